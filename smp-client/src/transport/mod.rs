use std::io;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use thiserror::Error;

use crate::packet::Scheme;

mod udp;
pub use udp::UdpTransport;

/// Smallest MTU any transport may negotiate.
pub const MTU_MIN: usize = 73;
/// Largest MTU any transport may negotiate.
pub const MTU_MAX: usize = 1024;

/// CoAP resource path management packets are posted to.
pub const COAP_URI_PATH: &str = "/omgr";

/// Default timeout for commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(40);
/// Short timeout for quick commands: parameter probes, erase, reset ACK.
pub const FAST_TIMEOUT: Duration = Duration::from_secs(5);

/// The connection state a transport reports to observers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link to the device
    Disconnected,
    /// Link establishment in progress
    Connecting,
    /// Link is up
    Connected,
}

/// Result of a [`Transport::connect`] call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The link is established
    Connected,
    /// The transport connects lazily on first send
    Deferred,
}

/// Errors that can happen while establishing a connection.
#[derive(Error, Debug, Diagnostic)]
pub enum ConnectError {
    /// The underlying link could not be established
    #[error("connecting to the device failed")]
    #[diagnostic(code(smp_client::transport::connect))]
    Failed(#[from] io::Error),
}

/// Errors that can happen while sending a packet.
#[derive(Error, Debug, Diagnostic)]
pub enum SendError {
    /// Writing to the underlying link failed
    #[error("sending failed")]
    #[diagnostic(code(smp_client::transport::send))]
    SendFailed(#[from] io::Error),
    /// The link is down
    #[error("transport is disconnected")]
    #[diagnostic(code(smp_client::transport::send::disconnected))]
    Disconnected,
    /// The negotiated MTU shrank below the packet size.
    ///
    /// Recoverable: callers lower their MTU to the reported value and restart
    /// the transfer in flight.
    #[error("packet exceeds the negotiated MTU, new MTU is {0}")]
    #[diagnostic(code(smp_client::transport::send::insufficient_mtu))]
    InsufficientMtu(usize),
}

/// Errors that can happen while receiving a packet.
#[derive(Error, Debug, Diagnostic)]
pub enum ReceiveError {
    /// Reading from the underlying link failed
    #[error("receiving failed")]
    #[diagnostic(code(smp_client::transport::recv))]
    ReceiveFailed(#[from] io::Error),
    /// No response arrived within the timeout
    #[error("timed out waiting for a response")]
    #[diagnostic(code(smp_client::transport::recv::timeout))]
    Timeout,
    /// The link went down while waiting
    #[error("transport is disconnected")]
    #[diagnostic(code(smp_client::transport::recv::disconnected))]
    Disconnected,
}

/// A duplex SMP transport.
///
/// Implementations move fully framed packets; header placement is decided by
/// [`scheme`](Transport::scheme). Send and receive are independent so that
/// several requests can be in flight at once; the connection layer pairs
/// responses back up by sequence number.
pub trait Transport {
    /// The packet framing scheme of this transport.
    fn scheme(&self) -> Scheme;

    /// Establishes the link, or reports that the transport connects lazily.
    fn connect(&mut self) -> Result<ConnectOutcome, ConnectError>;

    /// Tears the link down.
    fn close(&mut self);

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Sends one packet. On-air fragmentation below the MTU is the
    /// transport's concern; `packet` is always a whole SMP packet.
    fn send(&mut self, packet: &[u8], timeout: Duration) -> Result<(), SendError>;

    /// Receives one packet.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, ReceiveError>;

    /// Blocks until the transport reports [`ConnectionState::Disconnected`].
    ///
    /// The default implementation polls [`state`](Transport::state).
    /// Transports without link supervision simply time out; callers treat
    /// that as "the device reset without us noticing".
    fn await_disconnect(&mut self, timeout: Duration) -> Result<(), ReceiveError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state() == ConnectionState::Disconnected {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ReceiveError::Timeout);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

/// Checks that `mtu` lies within the valid SMP range.
pub fn validate_mtu(mtu: usize) -> bool {
    (MTU_MIN..=MTU_MAX).contains(&mtu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_bounds() {
        assert!(!validate_mtu(72));
        assert!(validate_mtu(73));
        assert!(validate_mtu(498));
        assert!(validate_mtu(1024));
        assert!(!validate_mtu(1025));
    }
}
