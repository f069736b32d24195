use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::SystemTime;

use miette::Diagnostic;
use thiserror::Error;

use crate::Group;
use crate::commands::image::{ImageUpload, ImageUploadResponse, UPLOAD_SHA_LEN};
use crate::connection::{Connection, ExecuteError, MtuError, RawResponse};
use crate::header::Operation;
use crate::packet;
use crate::transport::{DEFAULT_TIMEOUT, SendError};

/// State of the upload engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UploadState {
    /// No transfer in progress; the only state a new upload may start from
    Idle,
    /// Chunks are being dispatched
    Uploading,
    /// Dispatching is frozen, outstanding chunks have drained
    Paused,
}

/// Byte alignment applied to upload chunk sizes.
///
/// Some flash drivers only accept writes at word or page granularity;
/// aligned chunk sizes keep every chunk offset aligned as well.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ByteAlignment {
    /// No alignment
    #[default]
    Disabled,
    /// 2-byte alignment
    Two,
    /// 4-byte alignment
    Four,
    /// 8-byte alignment
    Eight,
    /// 16-byte alignment
    Sixteen,
}

impl ByteAlignment {
    /// The alignment in bytes, or `None` when disabled.
    pub fn bytes(self) -> Option<usize> {
        match self {
            ByteAlignment::Disabled => None,
            ByteAlignment::Two => Some(2),
            ByteAlignment::Four => Some(4),
            ByteAlignment::Eight => Some(8),
            ByteAlignment::Sixteen => Some(16),
        }
    }
}

/// One image of an upload plan.
#[derive(Debug, Clone)]
pub struct UploadImage {
    /// image number on the device
    pub index: u32,
    /// the image binary
    pub data: Vec<u8>,
    /// SHA256 over the image, identifying the upload session
    pub hash: [u8; 32],
}

/// Tunables of the upload engine.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// chunk size alignment
    pub alignment: ByteAlignment,
    /// number of chunks that may be in flight at once
    pub pipeline_depth: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            alignment: ByteAlignment::Disabled,
            pipeline_depth: 1,
        }
    }
}

impl UploadSettings {
    /// Whether more than one chunk may be in flight.
    pub fn pipelining_enabled(&self) -> bool {
        self.pipeline_depth > 1
    }
}

const REQUEST_NONE: u8 = 0;
const REQUEST_PAUSE: u8 = 1;
const REQUEST_CANCEL: u8 = 2;
const REQUEST_RESUME: u8 = 3;

/// Handle for pausing and cancelling a running upload.
///
/// Clones share the request slot; calls are safe from any context,
/// including from inside delegate callbacks.
#[derive(Clone, Debug, Default)]
pub struct UploadControl {
    request: Arc<AtomicU8>,
}

impl UploadControl {
    /// Requests that the engine stops dispatching new chunks and drains
    /// into [`UploadState::Paused`].
    pub fn pause(&self) {
        self.request.store(REQUEST_PAUSE, Ordering::SeqCst);
    }

    /// Requests cancellation. The engine turns idle after the next
    /// in-flight response arrives and delivers exactly one
    /// [`UploadDelegate::upload_did_cancel`].
    pub fn cancel(&self) {
        self.request.store(REQUEST_CANCEL, Ordering::SeqCst);
    }

    /// Requests that a paused transfer resumes. Consumed by the caller that
    /// owns the engine; the engine itself only runs while unpaused.
    pub fn resume(&self) {
        self.request.store(REQUEST_RESUME, Ordering::SeqCst);
    }

    pub(crate) fn take(&self) -> u8 {
        self.request.swap(REQUEST_NONE, Ordering::SeqCst)
    }

    pub(crate) fn is_resume(request: u8) -> bool {
        request == REQUEST_RESUME
    }

    pub(crate) fn is_pause(request: u8) -> bool {
        request == REQUEST_PAUSE
    }

    pub(crate) fn is_cancel(request: u8) -> bool {
        request == REQUEST_CANCEL
    }
}

/// Receiver of upload engine events.
pub trait UploadDelegate {
    /// Called whenever the acknowledged byte count grows.
    ///
    /// `bytes_sent` reports the highest acknowledged offset across the plan
    /// and is non-decreasing within one transfer attempt.
    fn upload_progress(&mut self, bytes_sent: u64, total: u64, timestamp: SystemTime) {
        let _ = (bytes_sent, total, timestamp);
    }

    /// Called once after the last image finished uploading.
    fn upload_did_finish(&mut self) {}

    /// Called exactly once after a cancellation took effect.
    fn upload_did_cancel(&mut self) {}
}

/// Errors of the upload engine.
#[derive(Error, Debug, Diagnostic)]
pub enum UploadError {
    /// An image of the plan carries no data
    #[error("image has no data")]
    #[diagnostic(code(smp_client::upload::invalid_data))]
    InvalidData,
    /// An upload response carried no offset
    #[error("upload response is missing the offset")]
    #[diagnostic(code(smp_client::upload::invalid_payload))]
    InvalidPayload,
    /// The MTU does not leave room for any chunk data
    #[error("MTU too small for an upload chunk")]
    #[diagnostic(code(smp_client::upload::mtu_too_small))]
    MtuTooSmall,
    /// Adjusting the MTU after an MTU renegotiation failed
    #[error("MTU adjustment failed")]
    #[diagnostic(code(smp_client::upload::mtu))]
    Mtu(#[from] MtuError),
    /// A transfer was started while another one is active
    #[error("an upload is already in progress")]
    #[diagnostic(code(smp_client::upload::already_in_progress))]
    AlreadyInProgress,
    /// Executing an upload command failed
    #[error("upload command failed")]
    #[diagnostic(code(smp_client::upload::execute))]
    Execute(#[from] ExecuteError),
}

/// How a run of the upload engine ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Every image of the plan is fully acknowledged
    Finished,
    /// A pause request took effect
    Paused,
    /// A cancel request took effect
    Cancelled,
}

/// Streaming, pipelined image uploader.
///
/// Feeds [`ImageUpload`] chunks through a [`Connection`], keeping up to
/// `pipeline_depth` chunks in flight and emitting one new chunk per
/// accepted response. Chunk sizes are derived from the connection's frame
/// budget by probing the encoded overhead of a one-byte chunk.
pub struct ImageUploader {
    images: Vec<UploadImage>,
    settings: UploadSettings,
    control: UploadControl,
    state: UploadState,
    current: usize,
    /// bytes of images completed in this attempt
    completed_bytes: u64,
    /// next offset to dispatch within the current image
    next_offset: u64,
    /// highest offset the device acknowledged within the current image
    acked_offset: u64,
    /// chunks dispatched for the current image whose responses are still due
    inflight_chunks: usize,
}

impl ImageUploader {
    /// Creates an uploader for the given plan.
    pub fn new(images: Vec<UploadImage>, settings: UploadSettings) -> Result<Self, UploadError> {
        if images.is_empty() || images.iter().any(|image| image.data.is_empty()) {
            return Err(UploadError::InvalidData);
        }
        Ok(Self {
            images,
            settings,
            control: UploadControl::default(),
            state: UploadState::Idle,
            current: 0,
            completed_bytes: 0,
            next_offset: 0,
            acked_offset: 0,
            inflight_chunks: 0,
        })
    }

    /// The engine state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// A control handle for pausing and cancelling.
    pub fn control(&self) -> UploadControl {
        self.control.clone()
    }

    /// Replaces the control handle, sharing an externally owned one.
    pub fn set_control(&mut self, control: UploadControl) {
        self.control = control;
    }

    /// Images that are not yet fully acknowledged.
    pub fn remaining_images(&self) -> &[UploadImage] {
        &self.images[self.current..]
    }

    /// Starts the transfer from the beginning of the plan.
    pub fn start(
        &mut self,
        connection: &mut Connection,
        delegate: &mut dyn UploadDelegate,
    ) -> Result<UploadOutcome, UploadError> {
        if self.state != UploadState::Idle {
            return Err(UploadError::AlreadyInProgress);
        }
        self.current = 0;
        self.completed_bytes = 0;
        self.next_offset = 0;
        self.acked_offset = 0;
        self.inflight_chunks = 0;
        self.run(connection, delegate)
    }

    /// Resumes a paused transfer from the highest offset the device
    /// reported.
    pub fn continue_upload(
        &mut self,
        connection: &mut Connection,
        delegate: &mut dyn UploadDelegate,
    ) -> Result<UploadOutcome, UploadError> {
        if self.state != UploadState::Paused {
            return Err(UploadError::AlreadyInProgress);
        }
        self.next_offset = self.acked_offset;
        self.run(connection, delegate)
    }

    /// Rewinds to offset 0 of the current image, dropping images that are
    /// already fully uploaded from the plan.
    ///
    /// Dispatching then produces the same wire bytes as a fresh start of the
    /// truncated plan. Used after an MTU renegotiation.
    fn restart_upload(&mut self) {
        self.images.drain(..self.current);
        self.current = 0;
        self.completed_bytes = 0;
        self.next_offset = 0;
        self.acked_offset = 0;
        self.inflight_chunks = 0;
    }

    fn plan_total(&self) -> u64 {
        self.images.iter().map(|image| image.data.len() as u64).sum()
    }

    fn has_more_chunks(&self) -> bool {
        self.current < self.images.len()
            && self.next_offset < self.images[self.current].data.len() as u64
    }

    fn run(
        &mut self,
        connection: &mut Connection,
        delegate: &mut dyn UploadDelegate,
    ) -> Result<UploadOutcome, UploadError> {
        self.state = UploadState::Uploading;
        let mut pausing = false;
        let mut cancelling = false;

        loop {
            match self.control.take() {
                REQUEST_PAUSE => pausing = true,
                REQUEST_CANCEL => cancelling = true,
                _ => {}
            }

            if cancelling && connection.in_flight() == 0 {
                self.state = UploadState::Idle;
                connection.abort_pipeline();
                delegate.upload_did_cancel();
                return Ok(UploadOutcome::Cancelled);
            }
            if pausing && connection.in_flight() == 0 {
                self.state = UploadState::Paused;
                return Ok(UploadOutcome::Paused);
            }

            while !cancelling
                && !pausing
                && connection.in_flight() < self.settings.pipeline_depth.max(1)
                && self.has_more_chunks()
            {
                match self.dispatch_next_chunk(connection) {
                    Ok(()) => {}
                    Err(UploadError::Execute(ExecuteError::SendFailed(
                        SendError::InsufficientMtu(new_mtu),
                    ))) => {
                        log::info!("transport reports insufficient MTU, restarting at {new_mtu}");
                        connection.set_mtu(new_mtu)?;
                        self.restart_upload();
                    }
                    Err(err) => {
                        self.state = UploadState::Idle;
                        connection.abort_pipeline();
                        return Err(err);
                    }
                }
            }

            if connection.in_flight() == 0 {
                if !self.has_more_chunks() && self.current >= self.images.len() {
                    self.state = UploadState::Idle;
                    delegate.upload_did_finish();
                    return Ok(UploadOutcome::Finished);
                }
                continue;
            }

            let deliveries = match connection.collect_ready(DEFAULT_TIMEOUT) {
                Ok(deliveries) => deliveries,
                Err(err) => {
                    self.state = UploadState::Idle;
                    connection.abort_pipeline();
                    return Err(err.into());
                }
            };

            for (_, raw) in deliveries {
                if cancelling {
                    // The in-flight response arrived; no callbacks beyond
                    // the single cancellation notice.
                    self.state = UploadState::Idle;
                    connection.abort_pipeline();
                    delegate.upload_did_cancel();
                    return Ok(UploadOutcome::Cancelled);
                }

                match self.handle_response(raw, delegate) {
                    Ok(()) => {}
                    Err(err) => {
                        self.state = UploadState::Idle;
                        connection.abort_pipeline();
                        return Err(err);
                    }
                }
            }
        }
    }

    fn dispatch_next_chunk(&mut self, connection: &mut Connection) -> Result<(), UploadError> {
        let image = &self.images[self.current];
        let first = self.next_offset == 0;
        let capacity = chunk_capacity(
            connection,
            image,
            self.next_offset,
            self.settings.alignment,
        )?;

        let offset = usize::try_from(self.next_offset).map_err(|_| UploadError::InvalidData)?;
        let take = capacity.min(image.data.len() - offset);
        let command = ImageUpload {
            image: (first && image.index != 0).then_some(image.index),
            len: first.then_some(image.data.len() as u64),
            off: self.next_offset,
            sha: first.then(|| &image.hash[..UPLOAD_SHA_LEN]),
            data: &image.data[offset..offset + take],
        };

        connection.dispatch(&command, DEFAULT_TIMEOUT)?;
        self.next_offset += take as u64;
        self.inflight_chunks += 1;
        Ok(())
    }

    fn handle_response(
        &mut self,
        raw: RawResponse,
        delegate: &mut dyn UploadDelegate,
    ) -> Result<(), UploadError> {
        self.inflight_chunks = self.inflight_chunks.saturating_sub(1);
        let response = decode_upload_response(&raw)?;
        let off = response.off.ok_or(UploadError::InvalidPayload)?;

        // The device offset is authoritative. Once the window drained, a
        // mismatch means it dropped part of a chunk (resend from there) or
        // resumed a broken session (skip ahead).
        if self.inflight_chunks == 0 && off != self.next_offset {
            log::warn!(
                "device expects offset {off}, dispatched up to {}",
                self.next_offset,
            );
            self.next_offset = off;
        }
        self.acked_offset = self.acked_offset.max(off);

        let image_len = self.images[self.current].data.len() as u64;
        delegate.upload_progress(
            self.completed_bytes + self.acked_offset.min(image_len),
            self.plan_total(),
            SystemTime::now(),
        );

        // Advance only once every chunk response of this image is in, so a
        // trailing response cannot be misread against the next image.
        if self.acked_offset >= image_len && self.inflight_chunks == 0 {
            self.completed_bytes += image_len;
            self.current += 1;
            self.next_offset = 0;
            self.acked_offset = 0;
        }
        Ok(())
    }
}

/// Decodes an upload chunk response, mapping `rc`/`err` to errors first.
fn decode_upload_response(raw: &RawResponse) -> Result<ImageUploadResponse, UploadError> {
    Ok(raw.decode::<ImageUpload<'static, 'static>>()?)
}

/// Largest data chunk that fits the connection's frame budget for the given
/// image and offset.
///
/// The overhead is probed by encoding the chunk skeleton with a single data
/// byte; the CBOR length field growth for the real chunk size is then
/// accounted for separately.
fn chunk_capacity(
    connection: &Connection,
    image: &UploadImage,
    offset: u64,
    alignment: ByteAlignment,
) -> Result<usize, UploadError> {
    let budget = connection.frame_budget();
    let first = offset == 0;
    let skeleton = ImageUpload {
        image: (first && image.index != 0).then_some(image.index),
        len: first.then_some(image.data.len() as u64),
        off: offset,
        sha: first.then(|| &image.hash[..UPLOAD_SHA_LEN]),
        data: &[0u8],
    };

    let packet_with_one_byte = packet::encoded_packet_size(
        connection.scheme(),
        Operation::Write,
        Group::Image.code(),
        1,
        &skeleton,
    )
    .map_err(ExecuteError::from)?;
    let overhead = packet_with_one_byte - 1;

    let estimated = budget
        .checked_sub(overhead)
        .filter(|estimated| *estimated > 0)
        .ok_or(UploadError::MtuTooSmall)?;

    // The one-byte probe already paid for the bytes major byte; only the
    // extra length bytes of larger chunks remain.
    let data_length_bytes: usize = if estimated <= usize::from(u8::MAX) {
        1
    } else if estimated <= usize::from(u16::MAX) {
        2
    } else {
        4
    };

    let mut capacity = estimated
        .checked_sub(data_length_bytes)
        .filter(|capacity| *capacity > 0)
        .ok_or(UploadError::MtuTooSmall)?;

    if let Some(align) = alignment.bytes() {
        if capacity > align {
            capacity -= capacity % align;
        }
    }

    Ok(capacity)
}
