// src/uart/codec.rs
//
// Bit-packed UART line-config codec and conversions to serialport types.
// The remote endpoint takes the whole line configuration (stop bits, data
// bits, parity) as a single 32-bit word with a fixed marker bit; the word is
// range-checked after computation as a second line of defense behind the
// boundary validation in config.rs.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, StopBits};

use crate::error::BridgeError;

// ============================================================================
// Config Word Layout
// ============================================================================

/// Fixed high marker bit, always set in an encoded word.
pub const CONFIG_WORD_MARKER: u32 = 0b1000_0000_0000_0000_0000_0000_0000;

/// Smallest valid word: marker | stop=1 | data=5 | parity=none.
pub const CONFIG_WORD_MIN: u32 = 134_217_744;

/// Largest word the validation fence accepts. Also rejects malformed words
/// arriving from elsewhere, so it is deliberately the full low-6-bit span
/// rather than the exact set the encoder can produce.
pub const CONFIG_WORD_MAX: u32 = 134_217_791;

const STOP_BITS_SHIFT: u32 = 5;
const DATA_BITS_SHIFT: u32 = 2;
const STOP_BITS_MASK: u32 = 0b1;
const DATA_BITS_MASK: u32 = 0b111;
const PARITY_MASK: u32 = 0b11;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Default for Parity {
    fn default() -> Self {
        Parity::None
    }
}

impl Parity {
    /// Wire code used in the config word: 0 none, 1 odd, 2 even.
    pub fn code(self) -> u8 {
        match self {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Parity::None),
            1 => Some(Parity::Odd),
            2 => Some(Parity::Even),
            _ => None,
        }
    }
}

/// UART line settings. Fields are boundary-validated before an instance is
/// constructed (see SessionConfig); encode still fences the computed word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineConfig {
    pub stop_bits: u8,
    pub data_bits: u8,
    pub parity: Parity,
}

impl LineConfig {
    /// Pack the line settings into the 32-bit config word.
    ///
    /// The arithmetic runs in i64 so that inputs which somehow bypassed
    /// validation surface as an out-of-range word instead of wrapping.
    pub fn encode(&self) -> Result<u32, BridgeError> {
        let word = i64::from(CONFIG_WORD_MARKER)
            + ((i64::from(self.stop_bits) - 1) << STOP_BITS_SHIFT)
            + ((i64::from(self.data_bits) - 1) << DATA_BITS_SHIFT)
            + i64::from(self.parity.code());

        if word < i64::from(CONFIG_WORD_MIN) || word > i64::from(CONFIG_WORD_MAX) {
            return Err(BridgeError::EncodingRange { word });
        }

        Ok(word as u32)
    }
}

/// Inverse of `LineConfig::encode`. The remote protocol never requires this
/// direction; it exists so the bit layout is independently checkable and to
/// validate words received from untrusted sources.
pub fn decode_config_word(word: u32) -> Result<LineConfig, BridgeError> {
    if !(CONFIG_WORD_MIN..=CONFIG_WORD_MAX).contains(&word) {
        return Err(BridgeError::EncodingRange { word: i64::from(word) });
    }

    // The fence admits a few low-bit combinations the encoder never emits
    // (parity code 3, data field below 5 bits); reject those here.
    let parity = Parity::from_code((word & PARITY_MASK) as u8)
        .ok_or(BridgeError::EncodingRange { word: i64::from(word) })?;
    let data_bits = ((word >> DATA_BITS_SHIFT) & DATA_BITS_MASK) as u8 + 1;
    let stop_bits = ((word >> STOP_BITS_SHIFT) & STOP_BITS_MASK) as u8 + 1;

    if !(5..=8).contains(&data_bits) {
        return Err(BridgeError::EncodingRange { word: i64::from(word) });
    }

    Ok(LineConfig { stop_bits, data_bits, parity })
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Convert stop bits count to serialport crate's StopBits type
pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Tests
// ============================================================================
