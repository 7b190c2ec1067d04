// src/cli.rs
//
// Command-line surface. Parsing only; range validation lives in
// SessionConfig::from_cli so every entry point shares it.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "uartlink", version, about = "Bridge a local serial port to a remote UART endpoint")]
pub struct Cli {
    /// Device IP address or hostname, optionally with a port
    #[arg(long)]
    pub host: String,

    /// Local serial device to bridge (e.g. /dev/ttyUSB0, COM3)
    #[arg(long)]
    pub com: String,

    /// Baud rate, 80-5000000
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Stop bits, 1-2
    #[arg(long, default_value_t = 1)]
    pub stop: u8,

    /// Data bits, 5-8
    #[arg(long, default_value_t = 8)]
    pub data: u8,

    /// Parity mode: 0 none, 1 odd, 2 even
    #[arg(long, default_value_t = 0)]
    pub check: u8,

    /// HTTP proxy URL routing both the configuration call and the tunnel
    #[arg(long)]
    pub proxy: Option<String>,

    /// Use TLS (https configuration endpoint, wss tunnel)
    #[arg(long)]
    pub ssl: bool,

    /// Local interface IP to bind when the machine has several NICs
    #[arg(long)]
    pub ip: Option<String>,

    /// Verify the remote certificate chain. By default any certificate is
    /// accepted, since device-local endpoints usually present self-signed
    /// certs; pass this to require a valid chain instead.
    #[arg(long)]
    pub strict_tls: bool,

    /// Append log output to this file in addition to stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
