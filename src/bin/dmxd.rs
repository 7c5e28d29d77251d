use clap::Parser;
use color_eyre::eyre::Result;
use leddmx_controller::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Keeps one strip bound and executes commands read line by line from stdin
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// MAC address of the strip
    #[arg(env = "LEDDMX_ADDRESS")]
    address: String,
    /// Name to use if the strip is not discovered
    #[arg(long, env = "LEDDMX_NAME")]
    name: Option<String>,
    /// Seconds of inactivity before disconnecting, 0 keeps the link open
    #[arg(long, env = "LEDDMX_IDLE_DELAY", default_value_t = 0)]
    idle_delay: u64,
    /// Reset flag passed through to the session
    #[arg(long)]
    reset: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Request {
    TurnOn,
    TurnOff,
    SetColor((u8, u8, u8), Option<u8>),
    SetBrightness(u8),
    SetEffect(String),
    Update,
    State,
    Stop,
}

fn parse_request(line: &str) -> std::result::Result<Request, String> {
    let mut cmd = line.trim().splitn(2, ':');
    match cmd.next() {
        Some("turn_on") => Ok(Request::TurnOn),
        Some("turn_off") => Ok(Request::TurnOff),
        Some("set_color") => {
            let values = cmd
                .next()
                .ok_or("no color given")?
                .split(',')
                .map(|s| s.trim().parse::<u8>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| format!("invalid color: {e}"))?;
            match values[..] {
                [r, g, b] => Ok(Request::SetColor((r, g, b), None)),
                [r, g, b, brightness] => Ok(Request::SetColor((r, g, b), Some(brightness))),
                _ => Err("Invalid color format. Use R,G,B[,BRIGHTNESS] (e.g., 255,0,0 for red)".into()),
            }
        }
        Some("set_brightness") => cmd
            .next()
            .ok_or("no brightness given")?
            .trim()
            .parse()
            .map(Request::SetBrightness)
            .map_err(|_| "Brightness must be between 0 and 255".to_string()),
        Some("set_effect") => match cmd.next().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(Request::SetEffect(name.to_string())),
            _ => Err("no effect given".into()),
        },
        Some("update") => Ok(Request::Update),
        Some("state") => Ok(Request::State),
        Some("stop") => Ok(Request::Stop),
        Some("") | None => Err("No command given".into()),
        Some(other) => Err(format!("Unknown command: {other}")),
    }
}

fn format_state(state: &LightState) -> String {
    let on = match state.is_on {
        Some(true) => "on",
        Some(false) => "off",
        None => "unknown",
    };
    let rgb = state
        .rgb
        .map(|(r, g, b)| format!("{r},{g},{b}"))
        .unwrap_or_else(|| "none".to_string());
    let effect = state.effect.as_deref().unwrap_or(EFFECT_NONE);
    format!(
        "power={on} brightness={} rgb={rgb} effect={effect}",
        state.brightness
    )
}

async fn execute(device: &DeviceSession, request: Request) -> leddmx_controller::Result<String> {
    match request {
        Request::TurnOn => device.turn_on().await?,
        Request::TurnOff => device.turn_off().await?,
        Request::SetColor(rgb, brightness) => device.set_color(rgb, brightness).await?,
        Request::SetBrightness(value) => device.set_brightness_local(value).await?,
        Request::SetEffect(name) => device.set_effect(&name).await?,
        Request::Update => device.update().await?,
        Request::State => return Ok(format_state(&device.state())),
        Request::Stop => device.stop().await,
    }
    Ok("OK".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("leddmx_controller=info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
    color_eyre::install()?;

    let cli = Cli::parse();
    let mut config = SessionConfig::new(cli.address)
        .with_reset(cli.reset)
        .with_idle_delay(Duration::from_secs(cli.idle_delay));
    if let Some(name) = cli.name {
        config = config.with_name(name);
    }

    let transport = Arc::new(BtleplugTransport::new().await?);
    let device = DeviceSession::new(config, transport).await?;

    // Inform about successful initialization
    println!("OK");

    // Mainloop: wait for user input, line by line
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                break;
            }
        };

        match parse_request(&line) {
            Ok(request) => match execute(&device, request).await {
                Ok(reply) => println!("{reply}"),
                Err(e) => println!("ERR {e}"),
            },
            Err(e) => println!("ERR {e}"),
        }
    }

    device.stop().await;
    Ok(())
}
