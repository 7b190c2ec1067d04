// src/error.rs
//
// Error types for the bridge. Setup failures (parameters, encoding, control
// plane, tunnel, serial open) are fatal and bubble up to main; steady-state
// relay failures are not errors, they end a direction and are reported as
// RelayOutcome values instead.

use std::fmt;

/// Control-plane failure detail. Every variant aborts the session before the
/// tunnel is opened.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlPlaneError {
    /// The HTTP request itself failed (dial, TLS, proxy, body read).
    Request { detail: String },
    /// The endpoint answered with a non-200 status.
    Status { code: u16 },
    /// The 200 response body did not decode as a configuration ack.
    Decode { detail: String },
    /// The remote device reported that opening the UART failed.
    Rejected { title: String, body: String },
}

impl fmt::Display for ControlPlaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlPlaneError::Request { detail } => {
                write!(f, "control-plane request failed: {}", detail)
            }
            ControlPlaneError::Status { code } => {
                write!(f, "control-plane request returned status {}", code)
            }
            ControlPlaneError::Decode { detail } => {
                write!(f, "control-plane response was not a valid ack: {}", detail)
            }
            ControlPlaneError::Rejected { title, body } => {
                write!(f, "remote device rejected the UART configuration [{}]: {}", title, body)
            }
        }
    }
}

/// Top-level error for every setup phase of a bridge session.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeError {
    /// A user-supplied parameter failed boundary validation.
    InvalidParameter { name: &'static str, detail: String },
    /// A computed config word fell outside the valid range. Inputs are
    /// range-checked before encoding, so this indicates an internal defect
    /// (or a malformed word received from elsewhere), not bad user input.
    EncodingRange { word: i64 },
    /// The one-shot configuration exchange failed; see the inner detail.
    ControlPlane(ControlPlaneError),
    /// The streaming connection could not be established. DNS, TCP, TLS and
    /// upgrade failures all land here with the underlying cause preserved.
    TunnelDial { detail: String },
    /// The local serial device could not be opened or cloned.
    SerialOpen { device: String, detail: String },
    /// Local network setup failed (egress selection, dialer construction).
    Network { detail: String },
}

impl BridgeError {
    pub fn invalid_parameter(name: &'static str, detail: impl Into<String>) -> Self {
        BridgeError::InvalidParameter { name, detail: detail.into() }
    }

    pub fn tunnel_dial(detail: impl Into<String>) -> Self {
        BridgeError::TunnelDial { detail: detail.into() }
    }

    pub fn serial_open(device: impl Into<String>, detail: impl Into<String>) -> Self {
        BridgeError::SerialOpen { device: device.into(), detail: detail.into() }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        BridgeError::Network { detail: detail.into() }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::InvalidParameter { name, detail } => {
                write!(f, "invalid {}: {}", name, detail)
            }
            BridgeError::EncodingRange { word } => {
                write!(
                    f,
                    "serial line settings produced out-of-range config word {}; check stop/data/parity values",
                    word
                )
            }
            BridgeError::ControlPlane(inner) => inner.fmt(f),
            BridgeError::TunnelDial { detail } => {
                write!(f, "tunnel handshake failed: {}", detail)
            }
            BridgeError::SerialOpen { device, detail } => {
                write!(f, "failed to open serial port {}: {}", device, detail)
            }
            BridgeError::Network { detail } => write!(f, "network error: {}", detail),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<ControlPlaneError> for BridgeError {
    fn from(e: ControlPlaneError) -> Self {
        BridgeError::ControlPlane(e)
    }
}
