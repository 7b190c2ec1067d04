// src/net/egress.rs
//
// Local egress selection. Picks the IP the process should bind outbound
// connections to when the machine has more than one interface.

use std::net::IpAddr;

use crate::error::BridgeError;

/// Well-known public address used to let the OS pick an egress route.
const PROBE_ADDR: &str = "8.8.8.8:80";

/// Detect the default outbound IP by opening a UDP association to a public
/// address and reading back the chosen local endpoint. No packet is sent;
/// connect() on UDP only fixes the route.
pub fn detect_local_ip() -> Result<IpAddr, BridgeError> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0))
        .map_err(|e| BridgeError::network(format!("failed to create probe socket: {}", e)))?;
    socket
        .connect(PROBE_ADDR)
        .map_err(|e| BridgeError::network(format!("no usable outbound interface: {}", e)))?;
    let addr = socket
        .local_addr()
        .map_err(|e| BridgeError::network(format!("failed to read local endpoint: {}", e)))?;
    Ok(addr.ip())
}

/// Resolve the session's local IP: an explicit override wins, otherwise the
/// detected egress address is used.
pub fn resolve_local_ip(override_ip: Option<&str>) -> Result<IpAddr, BridgeError> {
    match override_ip {
        Some(raw) => raw.parse::<IpAddr>().map_err(|_| {
            BridgeError::invalid_parameter("ip", format!("{} is not an IP address", raw))
        }),
        None => detect_local_ip(),
    }
}
