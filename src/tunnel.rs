// src/tunnel.rs
//
// Tunnel establishment. Opens the persistent message-oriented WebSocket to
// the device's streaming endpoint over a TCP stream produced by the shared
// dialer, so the tunnel carries the same local-IP binding and proxy route as
// the control-plane call that preceded it.

use tokio::net::TcpStream;
use tokio_tungstenite::{client_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::config::SessionConfig;
use crate::error::BridgeError;
use crate::logging::tlog;
use crate::net::{split_host_port, Dialer};

/// The established streaming connection.
pub type TunnelConn = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the streaming tunnel. DNS, TCP, proxy, TLS and upgrade failures all
/// collapse into TunnelDial with the underlying cause preserved.
pub async fn open_tunnel(cfg: &SessionConfig, dialer: &Dialer) -> Result<TunnelConn, BridgeError> {
    let url = cfg.tunnel_url();
    let (host, port) = split_host_port(&cfg.host, cfg.default_port())?;

    let stream = dialer
        .connect(&host, port)
        .await
        .map_err(|e| BridgeError::tunnel_dial(e.to_string()))?;

    let connector = if cfg.tls {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!cfg.strict_tls)
            .build()
            .map_err(|e| BridgeError::tunnel_dial(format!("TLS connector: {}", e)))?;
        Some(Connector::NativeTls(tls))
    } else {
        Some(Connector::Plain)
    };

    let (ws, response) = client_async_tls_with_config(url.as_str(), stream, None, connector)
        .await
        .map_err(|e| BridgeError::tunnel_dial(e.to_string()))?;

    tlog!("[tunnel] upgrade accepted ({})", response.status());
    Ok(ws)
}
