use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Unreliable datagram transport the driver runs on.
///
/// Implementations must not block. A receive with nothing queued returns
/// `Ok(None)`.
pub trait Transport {
    /// Send one datagram to `addr`.
    fn send_dgram(&mut self, addr: SocketAddr, buf: &[u8]) -> io::Result<()>;

    /// Receive one datagram into `buf`.
    fn recv_dgram(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Largest datagram the transport can carry.
    fn max_send_size(&self) -> usize;
}

/// Conservative UDP payload size that avoids IP fragmentation on most paths.
pub const UDP_MAX_SEND_SIZE: usize = 1200;

impl Transport for UdpSocket {
    fn send_dgram(&mut self, addr: SocketAddr, buf: &[u8]) -> io::Result<()> {
        match self.send_to(buf, addr) {
            Ok(_) => Ok(()),
            // Full send buffer, the datagram is lost like any other.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("Send buffer full, drop {} bytes to {}", buf.len(), addr);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn recv_dgram(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.recv_from(buf) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn max_send_size(&self) -> usize {
        UDP_MAX_SEND_SIZE
    }
}
