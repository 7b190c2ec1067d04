// src/config.rs
//
// Immutable session configuration. Built once from the CLI at startup and
// passed by reference into every component; nothing mutates it afterwards.
// All boundary validation of user-supplied parameters happens here, before
// any network or serial activity.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::BridgeError;
use crate::uart::codec::{LineConfig, Parity};

pub const BAUD_MIN: u32 = 80;
pub const BAUD_MAX: u32 = 5_000_000;

/// Path of the one-shot configuration endpoint on the device.
pub const CONTROL_PATH: &str = "/api/uart/set";
/// Path of the streaming endpoint on the device.
pub const TUNNEL_PATH: &str = "/api/uart";

/// Timeout applied to every outbound dial. Steady-state relay reads and
/// writes are not time-limited.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a bridge session needs, validated. The control-plane and
/// tunnel URLs are derived from the same host and TLS flag, so their scheme
/// families (http↔ws, https↔wss) cannot diverge.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub host: String,
    pub device: String,
    pub baud: u32,
    pub line: LineConfig,
    pub proxy: Option<String>,
    pub tls: bool,
    pub local_ip: Option<String>,
    pub strict_tls: bool,
    pub log_file: Option<PathBuf>,
}

impl SessionConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, BridgeError> {
        if cli.host.is_empty() {
            return Err(BridgeError::invalid_parameter(
                "host",
                "device IP address or hostname must not be empty",
            ));
        }
        if cli.com.is_empty() {
            return Err(BridgeError::invalid_parameter(
                "com",
                "serial device must not be empty",
            ));
        }
        if cli.baud < BAUD_MIN || cli.baud > BAUD_MAX {
            return Err(BridgeError::invalid_parameter(
                "baud",
                format!("{} is outside {}-{} (default 115200)", cli.baud, BAUD_MIN, BAUD_MAX),
            ));
        }
        if !(1..=2).contains(&cli.stop) {
            return Err(BridgeError::invalid_parameter(
                "stop",
                format!("{} is outside 1-2 (default 1)", cli.stop),
            ));
        }
        if !(5..=8).contains(&cli.data) {
            return Err(BridgeError::invalid_parameter(
                "data",
                format!("{} is outside 5-8 (default 8)", cli.data),
            ));
        }
        let parity = Parity::from_code(cli.check).ok_or_else(|| {
            BridgeError::invalid_parameter(
                "check",
                format!("{} is not a parity mode (0 none, 1 odd, 2 even; default 0)", cli.check),
            )
        })?;

        Ok(Self {
            host: cli.host,
            device: cli.com,
            baud: cli.baud,
            line: LineConfig {
                stop_bits: cli.stop,
                data_bits: cli.data,
                parity,
            },
            proxy: cli.proxy.filter(|p| !p.is_empty()),
            tls: cli.ssl,
            local_ip: cli.ip.filter(|ip| !ip.is_empty()),
            strict_tls: cli.strict_tls,
            log_file: cli.log_file,
        })
    }

    /// URL of the one-shot configuration endpoint.
    pub fn control_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.host, CONTROL_PATH)
    }

    /// URL of the streaming tunnel endpoint.
    pub fn tunnel_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.host, TUNNEL_PATH)
    }

    /// Default TCP port for the host when none is embedded in it.
    pub fn default_port(&self) -> u16 {
        if self.tls {
            443
        } else {
            80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            host: "10.0.0.9".to_string(),
            com: "/dev/ttyUSB0".to_string(),
            baud: 115_200,
            stop: 1,
            data: 8,
            check: 0,
            proxy: None,
            ssl: false,
            ip: None,
            strict_tls: false,
            log_file: None,
        }
    }

    #[test]
    fn test_defaults_validate() {
        let cfg = SessionConfig::from_cli(base_cli()).unwrap();
        assert_eq!(cfg.baud, 115_200);
        assert_eq!(cfg.line.stop_bits, 1);
        assert_eq!(cfg.line.data_bits, 8);
        assert_eq!(cfg.line.parity, Parity::None);
    }

    #[test]
    fn test_range_checks_name_the_parameter() {
        let mut cli = base_cli();
        cli.baud = 79;
        assert!(matches!(
            SessionConfig::from_cli(cli),
            Err(BridgeError::InvalidParameter { name: "baud", .. })
        ));

        let mut cli = base_cli();
        cli.baud = 5_000_001;
        assert!(SessionConfig::from_cli(cli).is_err());

        let mut cli = base_cli();
        cli.stop = 3;
        assert!(matches!(
            SessionConfig::from_cli(cli),
            Err(BridgeError::InvalidParameter { name: "stop", .. })
        ));

        let mut cli = base_cli();
        cli.data = 4;
        assert!(matches!(
            SessionConfig::from_cli(cli),
            Err(BridgeError::InvalidParameter { name: "data", .. })
        ));

        let mut cli = base_cli();
        cli.check = 3;
        assert!(matches!(
            SessionConfig::from_cli(cli),
            Err(BridgeError::InvalidParameter { name: "check", .. })
        ));

        let mut cli = base_cli();
        cli.com = String::new();
        assert!(matches!(
            SessionConfig::from_cli(cli),
            Err(BridgeError::InvalidParameter { name: "com", .. })
        ));
    }

    #[test]
    fn test_urls_share_the_scheme_family() {
        let mut cli = base_cli();
        cli.host = "device.lan:8443".to_string();
        let plain = SessionConfig::from_cli(cli).unwrap();
        assert_eq!(plain.control_url(), "http://device.lan:8443/api/uart/set");
        assert_eq!(plain.tunnel_url(), "ws://device.lan:8443/api/uart");
        assert_eq!(plain.default_port(), 80);

        let mut cli = base_cli();
        cli.host = "device.lan".to_string();
        cli.ssl = true;
        let tls = SessionConfig::from_cli(cli).unwrap();
        assert_eq!(tls.control_url(), "https://device.lan/api/uart/set");
        assert_eq!(tls.tunnel_url(), "wss://device.lan/api/uart");
        assert_eq!(tls.default_port(), 443);
    }
}
