/*!
 # Command encoding

 Every command is a 9-byte buffer framed by `0x7b` and `0xbf`. Encoding is
 pure; the session decides what to send and when.
*/

/// Length of every command buffer
pub const COMMAND_LEN: usize = 9;

const HEADER: u8 = 0x7b;
const FOOTER: u8 = 0xbf;

/// Command to turn the device on
pub const TURN_ON_CMD: [u8; COMMAND_LEN] = [HEADER, 0xff, 0x07, 0x00, 0x00, 0xff, 0x00, 0xff, FOOTER];
/// Command to turn the device off
pub const TURN_OFF_CMD: [u8; COMMAND_LEN] = [HEADER, 0xff, 0x07, 0x00, 0x00, 0x00, 0x00, 0xff, FOOTER];

/// Color used when no color has been set yet
pub const DEFAULT_RGB: (u8, u8, u8) = (255, 255, 255);

/// A light intent that maps to exactly one command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Power the strip on
    PowerOn,
    /// Power the strip off
    PowerOff,
    /// Static color, scaled by brightness (0-255)
    Color { rgb: (u8, u8, u8), brightness: u8 },
    /// Device-side effect by code
    Effect(u8),
    /// Leave effect mode, returning to the last color (or white)
    EffectNone {
        last_rgb: Option<(u8, u8, u8)>,
        brightness: u8,
    },
}

impl Command {
    /// Encodes the intent into its wire buffer
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        match *self {
            Command::PowerOn => TURN_ON_CMD,
            Command::PowerOff => TURN_OFF_CMD,
            Command::Color { rgb, brightness } => color_command(rgb, brightness),
            Command::Effect(code) => [HEADER, 0xff, 0x03, code, 0xff, 0xff, 0xff, 0xff, FOOTER],
            Command::EffectNone {
                last_rgb,
                brightness,
            } => color_command(last_rgb.unwrap_or(DEFAULT_RGB), brightness),
        }
    }
}

/// Converts a 0-255 brightness into a truncated percentage
pub fn brightness_percent(brightness: u8) -> u8 {
    (u32::from(brightness) * 100 / 255) as u8
}

/// Scales one channel by brightness
///
/// The brightness is first truncated to a whole percentage, then the channel
/// is truncated again. The controller's calibration was observed against this
/// two-stage result, so `scale_channel(255, 200)` is 198, not 200.
pub fn scale_channel(channel: u8, brightness: u8) -> u8 {
    (u32::from(channel) * u32::from(brightness_percent(brightness)) / 100) as u8
}

fn color_command(rgb: (u8, u8, u8), brightness: u8) -> [u8; COMMAND_LEN] {
    let (red, green, blue) = rgb;
    [
        HEADER,
        0xff,
        0x07,
        scale_channel(red, brightness),
        scale_channel(green, brightness),
        scale_channel(blue, brightness),
        0x00,
        0xff,
        FOOTER,
    ]
}

/// Formats a buffer as space-separated hex, as logged before each write
pub fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
