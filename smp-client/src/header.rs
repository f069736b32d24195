use miette::Diagnostic;
use thiserror::Error;

/// Size of the SMP header in bytes.
pub const SMP_HEADER_SIZE: usize = 8;

/// SMP protocol version carried in every header emitted by this crate.
pub const SMP_VERSION: u8 = 0b01;

/// The operation field of an SMP header.
#[derive(strum_macros::FromRepr, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Read request
    Read = 0,
    /// Response to a read request
    ReadResponse = 1,
    /// Write request
    Write = 2,
    /// Response to a write request
    WriteResponse = 3,
}

impl Operation {
    /// The response operation matching this request operation.
    ///
    /// Response operations map to themselves.
    pub fn response(self) -> Self {
        match self {
            Operation::Read | Operation::ReadResponse => Operation::ReadResponse,
            Operation::Write | Operation::WriteResponse => Operation::WriteResponse,
        }
    }

    /// Whether this operation is a response.
    pub fn is_response(self) -> bool {
        matches!(self, Operation::ReadResponse | Operation::WriteResponse)
    }
}

/// Errors that can happen while decoding an SMP header.
#[derive(Error, Debug, Diagnostic)]
pub enum HeaderError {
    /// The given buffer is shorter than [`SMP_HEADER_SIZE`]
    #[error("not enough bytes for an SMP header (got {actual}, need {SMP_HEADER_SIZE})")]
    #[diagnostic(code(smp_client::header::invalid_size))]
    InvalidSize {
        /// number of bytes available
        actual: usize,
    },
}

/// The 8-byte SMP management header.
///
/// Wire layout: `op/version` byte, `flags`, `length` (be16), `group` (be16),
/// `sequence`, `command_id`. The `length` field must equal the size of the
/// CBOR body that follows the header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SmpHeader {
    /// operation
    pub operation: Operation,
    /// protocol version, `0b01` for SMP v2
    pub version: u8,
    /// flags, unused by this crate and sent as zero
    pub flags: u8,
    /// size of the CBOR body in bytes
    pub length: u16,
    /// command group id
    pub group: u16,
    /// sequence number used to pair requests with responses
    pub sequence: u8,
    /// command id within the group
    pub command_id: u8,
}

impl SmpHeader {
    /// Creates a request header with the crate's protocol version and zeroed
    /// flags. The `length` field is filled in by the packet builder.
    pub fn new(operation: Operation, group: u16, sequence: u8, command_id: u8) -> Self {
        Self {
            operation,
            version: SMP_VERSION,
            flags: 0,
            length: 0,
            group,
            sequence,
            command_id,
        }
    }

    /// Encodes the header into its 8-byte wire form.
    pub fn encode(self) -> [u8; SMP_HEADER_SIZE] {
        let [length_0, length_1] = self.length.to_be_bytes();
        let [group_0, group_1] = self.group.to_be_bytes();
        [
            ((self.version & 0b11) << 3) | (self.operation as u8 & 0b111),
            self.flags,
            length_0,
            length_1,
            group_0,
            group_1,
            self.sequence,
            self.command_id,
        ]
    }

    /// Decodes a header from the first [`SMP_HEADER_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, HeaderError> {
        let Some((header, _)) = data.split_first_chunk::<SMP_HEADER_SIZE>() else {
            return Err(HeaderError::InvalidSize { actual: data.len() });
        };

        // Operation values only span 0..=3, the full 3-bit field always
        // decodes.
        let operation = Operation::from_repr(header[0] & 0b111).unwrap_or(Operation::Read);

        Ok(Self {
            operation,
            version: (header[0] >> 3) & 0b11,
            flags: header[1],
            length: u16::from_be_bytes([header[2], header[3]]),
            group: u16::from_be_bytes([header[4], header[5]]),
            sequence: header[6],
            command_id: header[7],
        })
    }
}
