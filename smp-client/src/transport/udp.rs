use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::packet::Scheme;

use super::{
    ConnectError, ConnectOutcome, ConnectionState, MTU_MAX, ReceiveError, SendError, Transport,
};

/// SMP over CoAP over UDP.
///
/// Each SMP packet travels in a single datagram; the socket stays unbound
/// until [`connect`](Transport::connect) is called. UDP offers no link
/// supervision, so [`state`](Transport::state) only reflects whether the
/// socket is open.
pub struct UdpTransport {
    target: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    /// Creates a transport for the given device address. The socket is
    /// opened on [`connect`](Transport::connect).
    pub fn new(target: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            target,
            socket: None,
        })
    }

    fn open_socket(&self) -> io::Result<UdpSocket> {
        // Bind to the matching IP version; binding [::] breaks IPv4 targets
        // on hosts with IPV6_V6ONLY.
        let bind_addr = match self.target {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(self.target)?;
        Ok(socket)
    }
}

impl Transport for UdpTransport {
    fn scheme(&self) -> Scheme {
        Scheme::CoapUdp
    }

    fn connect(&mut self) -> Result<ConnectOutcome, ConnectError> {
        if self.socket.is_none() {
            self.socket = Some(self.open_socket()?);
        }
        Ok(ConnectOutcome::Connected)
    }

    fn close(&mut self) {
        self.socket = None;
    }

    fn state(&self) -> ConnectionState {
        if self.socket.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn send(&mut self, packet: &[u8], timeout: Duration) -> Result<(), SendError> {
        let socket = self.socket.as_ref().ok_or(SendError::Disconnected)?;
        socket.set_write_timeout(Some(timeout))?;

        let sent = socket.send(packet)?;
        if sent != packet.len() {
            return Err(SendError::SendFailed(io::Error::new(
                io::ErrorKind::WriteZero,
                "datagram was truncated",
            )));
        }

        log::trace!("UDP TX {} bytes to {}", packet.len(), self.target);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, ReceiveError> {
        let socket = self.socket.as_ref().ok_or(ReceiveError::Disconnected)?;
        socket.set_read_timeout(Some(timeout))?;

        let mut buffer = vec![0u8; MTU_MAX];
        match socket.recv(&mut buffer) {
            Ok(received) => {
                buffer.truncate(received);
                log::trace!("UDP RX {} bytes from {}", received, self.target);
                Ok(buffer)
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                Err(ReceiveError::Timeout)
            }
            Err(err) => Err(ReceiveError::ReceiveFailed(err)),
        }
    }
}
