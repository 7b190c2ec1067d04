// src/lib.rs
//
// uartlink: bridges a local serial port to a remote UART endpoint. Setup is
// strictly sequential (egress selection, remote configuration, serial open,
// tunnel establishment); the steady state is two independent relay
// directions that run until they fail or the process is interrupted.

pub mod cli;
pub mod config;
pub mod error;
mod logging;
pub mod net;
pub mod relay;
pub mod tunnel;
pub mod uart;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use error::{BridgeError, ControlPlaneError};
pub use logging::init_file_logging;

use config::{SessionConfig, DIAL_TIMEOUT};
use logging::tlog;
use uart::codec::Parity;
use uart::control::AckOutcome;

/// Run a full bridge session: configure the remote UART, open both
/// endpoints, then relay until both directions end. Setup failures return an
/// error; steady-state relay failures are logged per direction and end the
/// session normally.
pub async fn run(cfg: SessionConfig) -> Result<(), BridgeError> {
    let local_ip = net::egress::resolve_local_ip(cfg.local_ip.as_deref())?;
    let dialer = net::Dialer::new(local_ip, DIAL_TIMEOUT, cfg.proxy.clone());

    tlog!("[session] local address: {}", local_ip);
    tlog!("[session] remote host: {}", cfg.host);
    tlog!("[session] baud rate: {}", cfg.baud);
    tlog!("[session] data bits: {}", cfg.line.data_bits);
    tlog!("[session] stop bits: {}", cfg.line.stop_bits);
    tlog!("[session] parity: {}", cfg.line.parity.code());
    if let Some(proxy) = &cfg.proxy {
        tlog!("[session] proxy: {}", proxy);
    }

    // Remote configuration must succeed before anything is relayed.
    let config_word = cfg.line.encode()?;
    let outcome = uart::control::configure_remote(&cfg, config_word, &dialer).await?;
    if let AckOutcome::UnrecognizedType(kind) = outcome {
        tlog!("[control] unrecognized ack type {}; continuing without confirmation", kind);
    }

    let port = serialport::new(&cfg.device, cfg.baud)
        .data_bits(uart::codec::to_serialport_data_bits(cfg.line.data_bits))
        .stop_bits(uart::codec::to_serialport_stop_bits(cfg.line.stop_bits))
        .parity(uart::codec::to_serialport_parity(cfg.line.parity))
        .timeout(relay::SERIAL_IO_TIMEOUT)
        .open()
        .map_err(|e| BridgeError::serial_open(&cfg.device, e.to_string()))?;

    // Second handle so the two directions never share one: outbound reads
    // through the clone, inbound writes through the original.
    let reader = port
        .try_clone()
        .map_err(|e| BridgeError::serial_open(&cfg.device, format!("clone handle: {}", e)))?;

    tlog!(
        "[serial] opened {} at {} baud ({}-{}-{})",
        cfg.device,
        cfg.baud,
        cfg.line.data_bits,
        match cfg.line.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        },
        cfg.line.stop_bits
    );

    let tunnel = tunnel::open_tunnel(&cfg, &dialer).await?;
    tlog!("[tunnel] connected: {}", cfg.tunnel_url());

    let cancel = Arc::new(AtomicBool::new(false));
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tlog!("[session] interrupt received; shutting down");
            signal_cancel.store(true, Ordering::Relaxed);
        }
    });

    let (outbound, inbound) = relay::run_relay(reader, port, tunnel, cancel).await;
    tlog!(
        "[session] bridge finished ({}: {}; {}: {})",
        outbound.direction,
        outbound.reason,
        inbound.direction,
        inbound.reason
    );
    tlog!("[serial] closed {}", cfg.device);
    Ok(())
}
