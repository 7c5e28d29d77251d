use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use leddmx_controller::scanner::{self, ScannedDevice};
use leddmx_controller::*;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Target {
    /// MAC address of the strip
    #[arg(short, long, env = "LEDDMX_ADDRESS")]
    address: String,
    /// Name to use if the strip is not discovered
    #[arg(long, env = "LEDDMX_NAME")]
    name: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn LED strip on
    On {
        #[command(flatten)]
        target: Target,
    },
    /// Turn LED strip off
    Off {
        #[command(flatten)]
        target: Target,
    },
    /// Set custom RGB color
    Color {
        #[command(flatten)]
        target: Target,
        /// Red value (0-255)
        #[arg(short, long, default_value_t = 255)]
        red: u8,
        /// Green value (0-255)
        #[arg(short, long, default_value_t = 255)]
        green: u8,
        /// Blue value (0-255)
        #[arg(short, long, default_value_t = 255)]
        blue: u8,
        /// Brightness (0-255) used to scale the color
        #[arg(long)]
        brightness: Option<u8>,
    },
    /// Set brightness
    Brightness {
        #[command(flatten)]
        target: Target,
        /// Brightness level (0-255)
        #[arg(short, long, default_value_t = 255)]
        level: u8,
    },
    /// Set effect by name (see `effects`)
    Effect {
        #[command(flatten)]
        target: Target,
        /// Effect name, or "None" to return to a static color
        #[arg(short, long, default_value = EFFECT_AUTO)]
        effect: String,
    },
    /// List available effects
    Effects,
    /// Scan for nearby BLE devices
    Scan {
        /// Only show devices whose name starts with this prefix
        #[arg(short, long)]
        prefix: Option<String>,
        /// Scan duration in seconds
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    // Initialize tracing with pretty colors
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("leddmx_controller=info")),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    match cli.command {
        Commands::Effects => {
            for name in effect_list() {
                println!("{name}");
            }
        }
        Commands::Scan { prefix, timeout } => {
            let transport = BtleplugTransport::new().await?;
            let found = scanner::scan(
                transport.adapter(),
                Duration::from_secs(timeout),
                prefix.as_deref(),
            )
            .await?;
            print_scan(&found);
        }
        Commands::On { target } => {
            let device = connect(&target).await?;
            device.turn_on().await?;
            device.stop().await;
        }
        Commands::Off { target } => {
            let device = connect(&target).await?;
            device.turn_off().await?;
            device.stop().await;
        }
        Commands::Color {
            target,
            red,
            green,
            blue,
            brightness,
        } => {
            let device = connect(&target).await?;
            let mut request = TurnOnRequest::default().with_rgb((red, green, blue));
            if let Some(level) = brightness {
                request = request.with_brightness(level);
            }
            device.apply(&request).await?;
            device.stop().await;
        }
        Commands::Brightness { target, level } => {
            let device = connect(&target).await?;
            device
                .apply(&TurnOnRequest::default().with_brightness(level))
                .await?;
            device.stop().await;
        }
        Commands::Effect { target, effect } => {
            if effect != EFFECT_NONE && effect_code(&effect).is_none() {
                return Err(eyre!("Unknown effect {effect:?}, run `dmxc effects` for the list"));
            }
            let device = connect(&target).await?;
            device
                .apply(&TurnOnRequest::default().with_effect(effect))
                .await?;
            device.stop().await;
        }
    }

    Ok(())
}

/// Binds a session to the target strip
#[instrument]
async fn connect(target: &Target) -> Result<DeviceSession> {
    let transport = Arc::new(BtleplugTransport::new().await?);
    let mut config = SessionConfig::new(&target.address);
    if let Some(name) = &target.name {
        config = config.with_name(name);
    }

    match DeviceSession::new(config, transport).await {
        Ok(device) => {
            info!("Using {} ({})", device.name(), device.mac());
            Ok(device)
        }
        Err(e) => {
            error!("Failed to initialize device: {}", e);
            Err(e.into())
        }
    }
}

fn print_scan(found: &[ScannedDevice]) {
    if found.is_empty() {
        println!("No matching devices found.");
        return;
    }

    for device in found {
        let marker = if device.is_supported() { " *" } else { "" };
        println!("  {}{}", device.name, marker);
        println!("    Address: {}", device.address);
        if let Some(rssi) = device.rssi {
            println!("    RSSI: {rssi} dBm");
        }
    }
}
