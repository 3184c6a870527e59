//! Network subsystem for UDP audio transport

pub mod packet;
pub mod receiver;
pub mod sender;
pub mod udp;

pub use receiver::{UdpSourcePort, UdpSourceReceiver};
pub use sender::UdpSink;
pub use udp::{create_socket, UdpSocket};
