// src/net/mod.rs
//
// Network dialer bound to a chosen local address. Built once at startup and
// shared by the control-plane client and the tunnel so both originate from
// the same network identity (same source IP, same proxy when configured).

pub mod egress;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};

use crate::error::BridgeError;
use crate::logging::tlog;

// ============================================================================
// Host/Port Handling
// ============================================================================

/// Split a user-supplied host string into hostname and port, falling back to
/// `default_port` when none is given. Accepts `host`, `host:port`, `[v6]`
/// and `[v6]:port`; a bare IPv6 address (no brackets) is treated as a
/// port-less host.
pub fn split_host_port(host: &str, default_port: u16) -> Result<(String, u16), BridgeError> {
    if host.is_empty() {
        return Err(BridgeError::invalid_parameter("host", "host must not be empty"));
    }

    if let Some(rest) = host.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| {
            BridgeError::invalid_parameter("host", format!("unterminated IPv6 literal: {}", host))
        })?;
        let name = rest[..end].to_string();
        let tail = &rest[end + 1..];
        if tail.is_empty() {
            return Ok((name, default_port));
        }
        let port = tail
            .strip_prefix(':')
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| {
                BridgeError::invalid_parameter("host", format!("bad port in {}", host))
            })?;
        return Ok((name, port));
    }

    match host.rsplit_once(':') {
        // A single colon separates host and port; more than one means a bare
        // IPv6 address.
        Some((name, port)) if !name.contains(':') => {
            let port = port.parse::<u16>().map_err(|_| {
                BridgeError::invalid_parameter("host", format!("bad port in {}", host))
            })?;
            Ok((name.to_string(), port))
        }
        _ => Ok((host.to_string(), default_port)),
    }
}

// ============================================================================
// Dialer
// ============================================================================

/// Connection factory carrying the session's network identity: the local IP
/// every outbound connection binds to, the dial timeout, and the optional
/// HTTP proxy both planes route through.
#[derive(Clone, Debug)]
pub struct Dialer {
    local_ip: IpAddr,
    timeout: Duration,
    proxy: Option<String>,
}

impl Dialer {
    pub fn new(local_ip: IpAddr, timeout: Duration, proxy: Option<String>) -> Self {
        Self { local_ip, timeout, proxy }
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    /// Build an HTTP client bound to this dialer's identity. Used for the
    /// control-plane call; `accept_invalid_certs` carries the session's TLS
    /// strictness through to certificate checking.
    pub fn http_client(&self, accept_invalid_certs: bool) -> Result<reqwest::Client, BridgeError> {
        let mut builder = reqwest::Client::builder()
            .local_address(self.local_ip)
            .connect_timeout(self.timeout)
            .danger_accept_invalid_certs(accept_invalid_certs);

        builder = match &self.proxy {
            Some(url) => builder.proxy(reqwest::Proxy::all(url.as_str()).map_err(|e| {
                BridgeError::invalid_parameter("proxy", format!("{}: {}", url, e))
            })?),
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| BridgeError::network(format!("failed to build HTTP client: {}", e)))
    }

    /// Open a TCP connection to `host:port`, routed through the configured
    /// proxy when one is set. The returned stream is ready for a protocol
    /// handshake (TLS, WebSocket upgrade) on top.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, BridgeError> {
        match &self.proxy {
            Some(proxy_url) => {
                let (proxy_host, proxy_port) = proxy_addr(proxy_url)?;
                let mut stream = self.connect_tcp(&proxy_host, proxy_port).await?;
                proxy_connect_handshake(&mut stream, host, port).await?;
                tlog!("[dialer] tunnelled through proxy {} to {}:{}", proxy_url, host, port);
                Ok(stream)
            }
            None => self.connect_tcp(host, port).await,
        }
    }

    /// Resolve and connect directly, binding the socket to the local IP.
    /// Addresses whose family does not match the bound IP are skipped.
    pub async fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream, BridgeError> {
        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| BridgeError::network(format!("failed to resolve {}: {}", host, e)))?;

        let mut last_failure: Option<String> = None;
        let mut tried = 0usize;

        for addr in addrs {
            if addr.is_ipv4() != self.local_ip.is_ipv4() {
                continue;
            }
            tried += 1;

            let created = if addr.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() };
            let socket = match created {
                Ok(s) => s,
                Err(e) => {
                    last_failure = Some(format!("socket: {}", e));
                    continue;
                }
            };
            if let Err(e) = socket.bind(SocketAddr::new(self.local_ip, 0)) {
                last_failure = Some(format!("bind {}: {}", self.local_ip, e));
                continue;
            }

            match tokio::time::timeout(self.timeout, socket.connect(addr)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => last_failure = Some(format!("connect {}: {}", addr, e)),
                Err(_) => last_failure = Some(format!("connect {}: timed out", addr)),
            }
        }

        if tried == 0 {
            return Err(BridgeError::network(format!(
                "no {} addresses for {} match local address {}",
                if self.local_ip.is_ipv4() { "IPv4" } else { "IPv6" },
                host,
                self.local_ip
            )));
        }
        Err(BridgeError::network(format!(
            "could not connect to {}:{}: {}",
            host,
            port,
            last_failure.unwrap_or_else(|| "no addresses".to_string())
        )))
    }
}

/// Extract host and port from a proxy URL string.
fn proxy_addr(proxy_url: &str) -> Result<(String, u16), BridgeError> {
    let url = reqwest::Url::parse(proxy_url)
        .map_err(|e| BridgeError::invalid_parameter("proxy", format!("{}: {}", proxy_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| {
            BridgeError::invalid_parameter("proxy", format!("{} has no host", proxy_url))
        })?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(8080);
    Ok((host, port))
}

/// Issue an HTTP CONNECT for `host:port` on an open proxy connection and
/// consume the response headers, leaving the stream positioned at the start
/// of the tunnelled bytes.
async fn proxy_connect_handshake(
    stream: &mut TcpStream,
    host: &str,
    port: u16,
) -> Result<(), BridgeError> {
    let request = format!(
        "CONNECT {0}:{1} HTTP/1.1\r\nHost: {0}:{1}\r\nConnection: keep-alive\r\n\r\n",
        host, port
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| BridgeError::network(format!("proxy CONNECT write: {}", e)))?;

    // Read byte-wise up to the blank line; nothing follows the headers until
    // we speak first, so this cannot eat tunnelled data.
    let mut head: Vec<u8> = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| BridgeError::network(format!("proxy CONNECT read: {}", e)))?;
        if n == 0 {
            return Err(BridgeError::network("proxy closed during CONNECT"));
        }
        head.push(byte[0]);
        if head.len() > 8192 {
            return Err(BridgeError::network("proxy CONNECT response too large"));
        }
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or("");
    let accepted = status_line
        .split_whitespace()
        .nth(1)
        .map(|code| code == "200")
        .unwrap_or(false);
    if !accepted {
        return Err(BridgeError::network(format!(
            "proxy refused CONNECT: {}",
            status_line
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
