// src/uart/control.rs
//
// Remote UART configurator. Issues exactly one POST to the device's
// /api/uart/set endpoint carrying the baud rate and encoded config word and
// interprets the structured JSON ack. No retry: a failed attempt aborts the
// session, since relaying without a confirmed remote configuration is unsafe.

use reqwest::header::{CONNECTION, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::config::{SessionConfig, BAUD_MAX, BAUD_MIN};
use crate::error::{BridgeError, ControlPlaneError};
use crate::logging::tlog;
use crate::net::Dialer;
use crate::uart::codec::{CONFIG_WORD_MAX, CONFIG_WORD_MIN};

/// Client identifier sent with every control-plane request.
pub const CLIENT_IDENT: &str = concat!("uartlink/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Wire Types
// ============================================================================

/// Request body for the configuration endpoint. Both fields are decimal
/// string encodings of integers; the device firmware parses them itself.
#[derive(Clone, Debug, Serialize)]
pub struct ConfigPayload {
    pub baud: String,
    pub config: String,
}

impl ConfigPayload {
    pub fn new(baud: u32, config_word: u32) -> Self {
        Self {
            baud: baud.to_string(),
            config: config_word.to_string(),
        }
    }
}

/// Structured acknowledgment from the configuration endpoint.
/// `type == 1` is a UART-open result whose `level` field carries the verdict;
/// other types are not part of the open handshake. Missing fields decode to
/// empty/zero, matching device firmware that omits them.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ConfigAck {
    #[serde(rename = "type", default)]
    pub kind: i64,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// How a decodable, non-rejecting ack should be read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// `type == 1`, `level == "1"`: the remote UART is open.
    Accepted,
    /// Any other `type`. The device sent something this protocol revision
    /// does not know about; the caller decides whether to proceed.
    UnrecognizedType(i64),
}

// ============================================================================
// Ack Interpretation
// ============================================================================

/// Pure interpretation of an HTTP response from the configuration endpoint.
/// Split out from the transport so the decision table is testable.
pub fn interpret_ack(status: u16, body: &str) -> Result<(ConfigAck, AckOutcome), ControlPlaneError> {
    if status != 200 {
        return Err(ControlPlaneError::Status { code: status });
    }

    let ack: ConfigAck =
        serde_json::from_str(body).map_err(|e| ControlPlaneError::Decode { detail: e.to_string() })?;

    let outcome = if ack.kind == 1 {
        if ack.level == "1" {
            AckOutcome::Accepted
        } else {
            return Err(ControlPlaneError::Rejected {
                title: ack.title,
                body: ack.body,
            });
        }
    } else {
        AckOutcome::UnrecognizedType(ack.kind)
    };

    Ok((ack, outcome))
}

// ============================================================================
// Configurator
// ============================================================================

/// Push the UART configuration to the remote device.
///
/// The request goes through the shared dialer so it originates from the same
/// local address (and proxy, when set) as the tunnel that follows it.
/// Certificate checking follows the session's TLS strictness setting.
pub async fn configure_remote(
    cfg: &SessionConfig,
    config_word: u32,
    dialer: &Dialer,
) -> Result<AckOutcome, BridgeError> {
    // Revalidate preconditions. The boundary has already checked both, so a
    // failure here is a caller bug, but the request must never go out with
    // unchecked values.
    if cfg.baud < BAUD_MIN || cfg.baud > BAUD_MAX {
        return Err(BridgeError::invalid_parameter(
            "baud",
            format!("{} is outside {}-{}", cfg.baud, BAUD_MIN, BAUD_MAX),
        ));
    }
    if !(CONFIG_WORD_MIN..=CONFIG_WORD_MAX).contains(&config_word) {
        return Err(BridgeError::EncodingRange { word: i64::from(config_word) });
    }

    let client = dialer.http_client(!cfg.strict_tls)?;
    let url = cfg.control_url();
    let payload = ConfigPayload::new(cfg.baud, config_word);

    let response = client
        .post(&url)
        .header(USER_AGENT, CLIENT_IDENT)
        .header(CONNECTION, "keep-alive")
        .json(&payload)
        .send()
        .await
        .map_err(|e| ControlPlaneError::Request { detail: e.to_string() })?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ControlPlaneError::Request { detail: e.to_string() })?;

    let (ack, outcome) = interpret_ack(status, &body)?;

    tlog!("[control] remote result [{}]: {}", ack.title, ack.body);
    if outcome == AckOutcome::Accepted {
        tlog!("[control] remote UART opened");
    }

    Ok(outcome)
}

// ============================================================================
// Tests
// ============================================================================
