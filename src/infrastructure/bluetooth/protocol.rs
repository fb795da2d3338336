//! LED Strip Controller Protocol
//!
//! Wire format for SP11x-class addressable LED strip controllers: command
//! frames written to the control characteristic and the 12-byte state frame
//! read back from it.

use crate::domain::models::DeviceState;
use thiserror::Error;
use uuid::Uuid;

/// GATT service exposed by the controller firmware.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Single control characteristic: commands are written to it, the state
/// frame is read from it.
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Expected length of the device state frame.
pub const STATE_FRAME_LEN: usize = 12;

/// Maximum UTF-8 byte length the firmware accepts for a device name.
pub const MAX_NAME_BYTES: usize = 10;

// Command suffix bytes. These are agreed with the firmware; changing any of
// them is a protocol break, not a local refactor.
const CMD_POWER_ON: u8 = 0xAA;
const CMD_POWER_OFF: u8 = 0xAB;
const CMD_SET_COLOR: u8 = 0x1E;
const CMD_SET_BRIGHTNESS: u8 = 0x2A;
const RENAME_PREFIX: [u8; 1] = [0xBB];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("color must be exactly 6 hex digits, got {0:?}")]
    InvalidColor(String),
    #[error("device name must be 1..={MAX_NAME_BYTES} bytes of UTF-8, got {0} bytes")]
    InvalidName(usize),
    #[error("state frame too short: {0} bytes, expected at least {STATE_FRAME_LEN}")]
    ShortFrame(usize),
}

/// A wire-ready command. Only the encode functions below construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame(Vec<u8>);

impl CommandFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Encode a power command. Two constant 4-byte frames.
pub fn encode_power(on: bool) -> CommandFrame {
    let cmd = if on { CMD_POWER_ON } else { CMD_POWER_OFF };
    CommandFrame(vec![0x00, 0x00, 0x00, cmd])
}

/// Encode a set-color command from a 6-hex-digit string (e.g. "FF0080").
pub fn encode_color(hex: &str) -> Result<CommandFrame, CommandError> {
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CommandError::InvalidColor(hex.to_string()));
    }

    let r = u8::from_str_radix(&hex[0..2], 16).expect("validated hex digits");
    let g = u8::from_str_radix(&hex[2..4], 16).expect("validated hex digits");
    let b = u8::from_str_radix(&hex[4..6], 16).expect("validated hex digits");

    Ok(CommandFrame(vec![r, g, b, CMD_SET_COLOR]))
}

/// Encode a set-brightness command.
///
/// Out-of-range input is clamped to `[0, 255]`; clamping is the defined
/// policy for slider-driven values, not a failure.
pub fn encode_brightness(value: i32) -> CommandFrame {
    let v = value.clamp(0, 255) as u8;
    CommandFrame(vec![v, 0x00, 0x00, CMD_SET_BRIGHTNESS])
}

/// Encode a rename command: `[byte_len]` then prefix then UTF-8 name bytes.
///
/// The length prefix counts encoded UTF-8 bytes, not characters, so
/// multi-byte names are measured the way the firmware measures them.
pub fn encode_rename(name: &str) -> Result<CommandFrame, CommandError> {
    let encoded = name.as_bytes();
    if encoded.is_empty() || encoded.len() > MAX_NAME_BYTES {
        return Err(CommandError::InvalidName(encoded.len()));
    }

    let mut frame = Vec::with_capacity(1 + RENAME_PREFIX.len() + encoded.len());
    frame.push(encoded.len() as u8);
    frame.extend_from_slice(&RENAME_PREFIX);
    frame.extend_from_slice(encoded);
    Ok(CommandFrame(frame))
}

/// Decode the 12-byte device state frame.
///
/// # State Frame Structure
///
/// ```text
/// [0]    : power (0 = off, non-zero = on)
/// [1]    : preset / effect mode
/// [2]    : effect speed
/// [3]    : brightness
/// [4]    : IC model index
/// [5]    : channel / color order index
/// [6-7]  : pixel count (u16 big-endian)
/// [8]    : red
/// [9]    : green
/// [10]   : blue
/// [11]   : white channel brightness
/// ```
///
/// Trailing bytes beyond offset 11 are ignored so newer firmware can append
/// fields. Every byte value at every offset is legal input.
pub fn decode_device_state(bytes: &[u8]) -> Result<DeviceState, CommandError> {
    if bytes.len() < STATE_FRAME_LEN {
        return Err(CommandError::ShortFrame(bytes.len()));
    }

    Ok(DeviceState {
        is_on: bytes[0] != 0,
        preset: bytes[1],
        speed: bytes[2],
        brightness: bytes[3],
        ic_model: bytes[4],
        channel: bytes[5],
        pixel_count: u16::from_be_bytes([bytes[6], bytes[7]]),
        red: format!("{:02X}", bytes[8]),
        green: format!("{:02X}", bytes[9]),
        blue: format!("{:02X}", bytes[10]),
        white_brightness: bytes[11],
    })
}
