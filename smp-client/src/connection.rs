use std::collections::HashMap;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use thiserror::Error;

use crate::commands::{McuMgrCommand, RawError, ResponseStatus};
use crate::header::{Operation, SmpHeader};
use crate::packet::{self, PacketError, Scheme};
use crate::rob::{ReorderBuffer, RobError, SequenceCounter};
use crate::transport::{
    ConnectError, ConnectOutcome, ConnectionState, ReceiveError, SendError, Transport,
    validate_mtu,
};

/// Errors of [`Connection::set_mtu`].
#[derive(Error, Debug, Diagnostic)]
pub enum MtuError {
    /// The value lies outside the valid SMP MTU range
    #[error("MTU value {0} is outside the valid range")]
    #[diagnostic(code(smp_client::connection::mtu::out_of_range))]
    OutsideValidRange(usize),
    /// The value equals the current MTU
    #[error("MTU value {0} is unchanged")]
    #[diagnostic(code(smp_client::connection::mtu::unchanged))]
    Unchanged(usize),
}

/// Errors that can happen while executing an SMP command.
#[derive(Error, Debug, Diagnostic)]
pub enum ExecuteError {
    /// An error happened on transport level while sending the request
    #[error("sending failed")]
    #[diagnostic(code(smp_client::connection::execute::send))]
    SendFailed(#[from] SendError),
    /// An error happened on transport level while receiving the response
    #[error("receiving failed")]
    #[diagnostic(code(smp_client::connection::execute::receive))]
    ReceiveFailed(#[from] ReceiveError),
    /// The request or response packet is malformed
    #[error("packet error")]
    #[diagnostic(code(smp_client::connection::execute::packet))]
    Packet(#[from] PacketError),
    /// A response arrived with a sequence number outside the pipeline window
    #[error("response sequencing failed")]
    #[diagnostic(code(smp_client::connection::execute::sequencing))]
    Sequencing(#[from] RobError),
    /// The response payload could not be decoded into the typed response
    #[error("cbor decoding failed")]
    #[diagnostic(code(smp_client::connection::execute::decode))]
    DecodeFailed,
    /// The response does not belong to the request it was paired with
    #[error("invalid response: {0}")]
    #[diagnostic(code(smp_client::connection::execute::invalid_response))]
    InvalidResponse(String),
    /// The device returned an SMP error code
    #[error("device returned error {0}")]
    #[diagnostic(code(smp_client::connection::execute::device_error))]
    ErrorResponse(ResponseStatus),
}

impl ExecuteError {
    /// Whether the device rejected the command as not supported.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, ExecuteError::ErrorResponse(status) if status.is_not_supported())
    }
}

/// A response paired to its request but not yet decoded.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// the response header
    pub header: SmpHeader,
    /// the CBOR body
    pub payload: Vec<u8>,
}

impl RawResponse {
    /// Decodes the payload into the typed response of command `C`, mapping
    /// `rc`/`err` fields to [`ExecuteError::ErrorResponse`] first.
    ///
    /// An empty body never counts as success; error replies usually lack the
    /// command-specific fields, which is why the status fields are decoded
    /// ahead of the typed response.
    pub fn decode<C: McuMgrCommand>(&self) -> Result<C::Response, ExecuteError> {
        if self.payload.is_empty() {
            return Err(ExecuteError::InvalidResponse("empty body".to_string()));
        }

        let status: RawError = ciborium::from_reader(self.payload.as_slice())
            .map_err(|_| ExecuteError::DecodeFailed)?;
        status.check().map_err(ExecuteError::ErrorResponse)?;

        ciborium::from_reader(self.payload.as_slice()).map_err(|_| ExecuteError::DecodeFailed)
    }
}

#[derive(Debug, Copy, Clone)]
struct PendingRequest {
    operation: Operation,
    group: u16,
    command_id: u8,
}

/// An SMP protocol layer connection to a device.
///
/// Pairs responses with requests by sequence number and delivers pipelined
/// completions strictly in dispatch order. In most cases this struct is used
/// indirectly through [`SmpClient`](crate::SmpClient).
pub struct Connection {
    transport: Box<dyn Transport + Send>,
    scheme: Scheme,
    sequence: SequenceCounter,
    rob: ReorderBuffer<RawResponse>,
    pending: HashMap<u8, PendingRequest>,
    mtu: usize,
    reassembly_buffer_size: u64,
}

impl Connection {
    /// Creates a new connection over the given transport.
    ///
    /// The initial sequence number is randomized so that stale responses
    /// from a previous session are unlikely to pair up.
    pub fn new<T: Transport + Send + 'static>(transport: T) -> Self {
        let scheme = transport.scheme();
        let sequence = SequenceCounter::new(rand::random());
        let mut rob = ReorderBuffer::new();
        rob.reset(sequence.peek());
        Self {
            transport: Box::new(transport),
            scheme,
            sequence,
            rob,
            pending: HashMap::new(),
            mtu: scheme.default_mtu(),
            reassembly_buffer_size: 0,
        }
    }

    /// The packet framing scheme of the underlying transport.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The current MTU.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sets the MTU used for chunk sizing and on-air fragmentation.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), MtuError> {
        if !validate_mtu(mtu) {
            return Err(MtuError::OutsideValidRange(mtu));
        }
        if mtu == self.mtu {
            return Err(MtuError::Unchanged(mtu));
        }
        log::debug!("MTU set to {mtu}");
        self.mtu = mtu;
        Ok(())
    }

    /// Sets the device-side reassembly buffer size, as reported by the OS
    /// parameters command. Zero disables segmentation.
    pub fn set_reassembly_buffer_size(&mut self, size: u64) {
        self.reassembly_buffer_size = size;
    }

    /// Largest SMP packet that can currently be sent.
    ///
    /// With a reassembly buffer larger than the MTU the packet may exceed
    /// the MTU; it then travels in MTU-sized on-air fragments under a single
    /// sequence number.
    pub fn frame_budget(&self) -> usize {
        let sar = usize::try_from(self.reassembly_buffer_size).unwrap_or(usize::MAX);
        // The header length field bounds the payload.
        sar.max(self.mtu).min(usize::from(u16::MAX))
    }

    /// Establishes the transport link.
    pub fn connect(&mut self) -> Result<ConnectOutcome, ConnectError> {
        self.transport.connect()
    }

    /// Tears the transport link down.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Current transport connection state.
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Blocks until the transport reports a disconnect or `timeout` elapses.
    pub fn await_disconnect(&mut self, timeout: Duration) -> Result<(), ReceiveError> {
        self.transport.await_disconnect(timeout)
    }

    /// Number of requests dispatched but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Drops all in-flight bookkeeping and realigns the sequencing window.
    ///
    /// Called when a pipelined transfer is abandoned; responses of dropped
    /// requests that still arrive are rejected as out-of-window.
    pub fn abort_pipeline(&mut self) {
        self.pending.clear();
        self.rob.reset(self.sequence.peek());
    }

    /// Builds and sends the packet for `command` without waiting for the
    /// response. Returns the sequence number the response will carry.
    pub fn dispatch<C: McuMgrCommand>(
        &mut self,
        command: &C,
        timeout: Duration,
    ) -> Result<u8, ExecuteError> {
        let seq = self.sequence.next_seq();
        let header = SmpHeader::new(C::OPERATION, C::GROUP.code(), seq, C::COMMAND_ID);
        let packet = packet::build_packet(self.scheme, header, command)?;

        log::debug!(
            "TX seq={seq} {}/{} {}",
            C::GROUP,
            C::COMMAND_ID,
            hex::encode(&packet),
        );

        self.rob.expecting(seq)?;
        self.pending.insert(
            seq,
            PendingRequest {
                operation: C::OPERATION.response(),
                group: C::GROUP.code(),
                command_id: C::COMMAND_ID,
            },
        );

        if let Err(err) = self.send_fragmented(&packet, timeout) {
            self.abort_pipeline();
            return Err(err.into());
        }

        Ok(seq)
    }

    fn send_fragmented(&mut self, packet: &[u8], timeout: Duration) -> Result<(), SendError> {
        if packet.len() <= self.mtu {
            return self.transport.send(packet, timeout);
        }

        // Oversized packets rely on device-side reassembly; each on-air
        // fragment still respects the MTU.
        for fragment in packet.chunks(self.mtu) {
            self.transport.send(fragment, timeout)?;
        }
        Ok(())
    }

    /// Receives one packet and returns every response that became
    /// deliverable, in dispatch order.
    ///
    /// Out-of-order arrivals are buffered; the returned list is then empty
    /// until the gap fills.
    pub fn collect_ready(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<(u8, RawResponse)>, ExecuteError> {
        let bytes = self.transport.receive(timeout)?;
        let parsed = packet::parse_packet(self.scheme, &bytes)?;
        let seq = parsed.header.sequence;

        log::debug!("RX seq={seq} {}", hex::encode(&bytes));

        let Some(expected) = self.pending.get(&seq) else {
            return Err(RobError::OutOfWindow { sequence: seq }.into());
        };
        if parsed.header.operation != expected.operation
            || parsed.header.group != expected.group
            || parsed.header.command_id != expected.command_id
        {
            return Err(ExecuteError::InvalidResponse(format!(
                "response for seq {seq} does not match the request (group {}, command {})",
                parsed.header.group, parsed.header.command_id,
            )));
        }

        self.rob.receive(
            seq,
            RawResponse {
                header: parsed.header,
                payload: parsed.payload,
            },
        )?;

        let mut delivered = vec![];
        self.rob.drain(|seq, response| {
            delivered.push((seq, response));
        });
        for (seq, _) in &delivered {
            self.pending.remove(seq);
        }
        Ok(delivered)
    }

    /// Executes a command and waits for its decoded response.
    ///
    /// Suspends until the matching response arrives or `timeout` elapses.
    pub fn execute<C: McuMgrCommand>(
        &mut self,
        command: &C,
        timeout: Duration,
    ) -> Result<C::Response, ExecuteError> {
        let seq = self.dispatch(command, timeout)?;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ReceiveError::Timeout)?;

            for (delivered_seq, response) in self.collect_ready(remaining)? {
                if delivered_seq == seq {
                    return response.decode::<C>();
                }
                // Responses of earlier pipelined requests have no consumer
                // here; callers mixing execute into a pipelined transfer
                // collect those themselves first.
                log::warn!("dropping unclaimed response for seq {delivered_seq}");
            }
        }
    }
}
