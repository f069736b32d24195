use sha2::{Digest, Sha256};

use crate::Group;
use crate::commands::suit::EnvelopeUpload;
use crate::connection::Connection;
use crate::header::Operation;
use crate::packet;
use crate::transport::{DEFAULT_TIMEOUT, FAST_TIMEOUT};
use crate::upload::{UploadControl, UploadDelegate, UploadError, UploadOutcome, UploadState};

/// Computes the SHA256 digest of a SUIT envelope.
///
/// Matches the digest carried in the envelope's manifest when the manifest
/// uses the SHA256 algorithm.
pub fn envelope_digest(envelope: &[u8]) -> [u8; 32] {
    Sha256::digest(envelope).into()
}

/// Streaming uploader for a single SUIT envelope.
///
/// Chunking and offset handling follow the image upload engine; the
/// envelope is identified by the SHA256 digest from its manifest. The first
/// chunk uses the slow timeout since the device erases the staging area
/// before accepting it.
pub struct SuitEnvelopeUploader {
    envelope: Vec<u8>,
    digest: [u8; 32],
    control: UploadControl,
    state: UploadState,
    offset: u64,
}

impl SuitEnvelopeUploader {
    /// Creates an uploader for the given envelope and its manifest digest.
    pub fn new(envelope: Vec<u8>, digest: [u8; 32]) -> Result<Self, UploadError> {
        if envelope.is_empty() {
            return Err(UploadError::InvalidData);
        }
        Ok(Self {
            envelope,
            digest,
            control: UploadControl::default(),
            state: UploadState::Idle,
            offset: 0,
        })
    }

    /// The manifest digest identifying this envelope.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// The uploader state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// A control handle for pausing and cancelling.
    pub fn control(&self) -> UploadControl {
        self.control.clone()
    }

    /// Starts the transfer from offset 0.
    pub fn start(
        &mut self,
        connection: &mut Connection,
        delegate: &mut dyn UploadDelegate,
    ) -> Result<UploadOutcome, UploadError> {
        if self.state != UploadState::Idle {
            return Err(UploadError::AlreadyInProgress);
        }
        self.offset = 0;
        self.run(connection, delegate)
    }

    /// Resumes a paused transfer from the last device-reported offset.
    pub fn continue_upload(
        &mut self,
        connection: &mut Connection,
        delegate: &mut dyn UploadDelegate,
    ) -> Result<UploadOutcome, UploadError> {
        if self.state != UploadState::Paused {
            return Err(UploadError::AlreadyInProgress);
        }
        self.run(connection, delegate)
    }

    fn run(
        &mut self,
        connection: &mut Connection,
        delegate: &mut dyn UploadDelegate,
    ) -> Result<UploadOutcome, UploadError> {
        self.state = UploadState::Uploading;
        let total = self.envelope.len() as u64;

        while self.offset < total {
            let request = self.control.take();
            if UploadControl::is_cancel(request) {
                self.state = UploadState::Idle;
                delegate.upload_did_cancel();
                return Ok(UploadOutcome::Cancelled);
            }
            if UploadControl::is_pause(request) {
                self.state = UploadState::Paused;
                return Ok(UploadOutcome::Paused);
            }

            let first = self.offset == 0;
            let capacity = self.chunk_capacity(connection)?;
            let position = usize::try_from(self.offset).map_err(|_| UploadError::InvalidData)?;
            let take = capacity.min(self.envelope.len() - position);

            let command = EnvelopeUpload {
                len: first.then_some(total),
                off: self.offset,
                data: &self.envelope[position..position + take],
            };
            // The first chunk covers the device-side erase.
            let timeout = if first { DEFAULT_TIMEOUT } else { FAST_TIMEOUT };

            let response = match connection.execute(&command, timeout) {
                Ok(response) => response,
                Err(error) => {
                    self.state = UploadState::Idle;
                    connection.abort_pipeline();
                    return Err(error.into());
                }
            };
            let off = response.off.ok_or(UploadError::InvalidPayload)?;
            if off < self.offset {
                log::warn!("device rewound envelope offset from {} to {off}", self.offset);
            }
            self.offset = off;

            delegate.upload_progress(self.offset.min(total), total, std::time::SystemTime::now());
        }

        self.state = UploadState::Idle;
        delegate.upload_did_finish();
        Ok(UploadOutcome::Finished)
    }

    fn chunk_capacity(&self, connection: &Connection) -> Result<usize, UploadError> {
        let first = self.offset == 0;
        let skeleton = EnvelopeUpload {
            len: first.then_some(self.envelope.len() as u64),
            off: self.offset,
            data: &[0u8],
        };
        let packet_with_one_byte = packet::encoded_packet_size(
            connection.scheme(),
            Operation::Write,
            Group::Suit.code(),
            2,
            &skeleton,
        )
        .map_err(crate::connection::ExecuteError::from)?;

        let estimated = connection
            .frame_budget()
            .checked_sub(packet_with_one_byte - 1)
            .filter(|estimated| *estimated > 0)
            .ok_or(UploadError::MtuTooSmall)?;
        let data_length_bytes: usize = if estimated <= usize::from(u8::MAX) {
            1
        } else if estimated <= usize::from(u16::MAX) {
            2
        } else {
            4
        };
        estimated
            .checked_sub(data_length_bytes)
            .filter(|capacity| *capacity > 0)
            .ok_or(UploadError::MtuTooSmall)
    }
}
