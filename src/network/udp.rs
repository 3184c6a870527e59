//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::NetworkError;

pub use std::net::UdpSocket;

/// Kernel buffer size requested for audio sockets
pub const SOCKET_BUFFER_SIZE: usize = 1 << 20;

/// Receive timeout so reader threads can notice a stop request
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Create a UDP socket bound to `bind` with enlarged buffers and address
/// reuse. Buffer sizing failures are logged and ignored; some platforms cap
/// them.
pub fn create_socket(bind: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::debug!("Could not set receive buffer size: {}", e);
    }
    if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::debug!("Could not set send buffer size: {}", e);
    }

    socket
        .bind(&bind.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind, e)))?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(RECV_TIMEOUT))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral() {
        let socket = create_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = socket.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }
}
