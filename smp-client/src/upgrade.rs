use std::time::{Duration, SystemTime};

use miette::Diagnostic;
use thiserror::Error;

use crate::client::SmpClient;
use crate::commands::image::ImageSlotState;
use crate::connection::ExecuteError;
use crate::transport::{ConnectError, DEFAULT_TIMEOUT};
use crate::upload::{
    ByteAlignment, ImageUploader, UploadControl, UploadDelegate, UploadError, UploadImage,
    UploadOutcome, UploadSettings,
};

/// Upgrade mode, deciding which of the MCUboot test/confirm markers are
/// applied and when the device is reset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpgradeMode {
    /// Mark the image for a one-shot test boot only; the new firmware must
    /// confirm itself or it is reverted on the following reset
    TestOnly,
    /// Mark the image permanent without a test boot
    ConfirmOnly,
    /// Test boot first, confirm after the device came back up
    TestAndConfirm,
}

/// States of the upgrade state machine.
#[derive(strum_macros::Display, Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpgradeState {
    /// No upgrade in progress
    None,
    /// Probing device transfer parameters
    RequestParameters,
    /// Comparing the plan against the device slot states
    Validate,
    /// Images are being uploaded
    Upload,
    /// Erasing the application settings partition
    EraseAppSettings,
    /// Marking images for a test boot
    Test,
    /// Device reset and reconnect
    Reset,
    /// Marking images permanent
    Confirm,
    /// Terminal success state
    Success,
}

impl UpgradeState {
    /// Whether an upgrade is running.
    pub fn is_in_progress(self) -> bool {
        !matches!(self, UpgradeState::None | UpgradeState::Success)
    }
}

/// Configuration of an upgrade run.
#[derive(Debug, Clone)]
pub struct UpgradeConfiguration {
    /// Time the device needs to swap images after a reset, waited out
    /// before reconnecting.
    pub estimated_swap_time: Duration,
    /// Whether to erase the application settings partition after upload.
    /// Disabled automatically when the device does not announce transfer
    /// parameters.
    pub erase_app_settings: bool,
    /// Number of upload chunks kept in flight.
    pub pipeline_depth: usize,
    /// Upload chunk size alignment.
    pub byte_alignment: ByteAlignment,
    /// Device-side reassembly buffer size override. Zero probes the device.
    pub reassembly_buffer_size: u64,
}

impl Default for UpgradeConfiguration {
    fn default() -> Self {
        Self {
            estimated_swap_time: Duration::from_secs(10),
            erase_app_settings: false,
            pipeline_depth: 1,
            byte_alignment: ByteAlignment::Disabled,
            reassembly_buffer_size: 0,
        }
    }
}

/// Receiver of upgrade lifecycle events.
///
/// All methods default to no-ops so delegates implement only what they
/// observe.
pub trait UpgradeDelegate {
    /// Called once when the upgrade begins.
    fn upgrade_did_start(&mut self) {}

    /// Called on every state transition.
    fn upgrade_state_changed(&mut self, previous: UpgradeState, new: UpgradeState) {
        let _ = (previous, new);
    }

    /// Called once when the upgrade reached [`UpgradeState::Success`].
    fn upgrade_did_complete(&mut self) {}

    /// Called exactly once when the upgrade failed, with the state that was
    /// active at the failure.
    fn upgrade_did_fail(&mut self, state: UpgradeState, error: &UpgradeError) {
        let _ = (state, error);
    }

    /// Called exactly once when the upgrade was cancelled, with the state
    /// that was active at the cancellation.
    fn upgrade_did_cancel(&mut self, state: UpgradeState) {
        let _ = state;
    }

    /// Upload progress, forwarded from the upload engine.
    fn upload_progress(&mut self, bytes_sent: u64, total: u64, timestamp: SystemTime) {
        let _ = (bytes_sent, total, timestamp);
    }
}

/// Errors of the upgrade state machine.
#[derive(Error, Debug, Diagnostic)]
pub enum UpgradeError {
    /// A management command failed
    #[error("command execution failed")]
    #[diagnostic(code(smp_client::upgrade::execute))]
    Execute(#[from] ExecuteError),
    /// The image upload failed
    #[error("image upload failed")]
    #[diagnostic(code(smp_client::upgrade::upload))]
    Upload(#[from] UploadError),
    /// The image is already installed and confirmed on the device, which a
    /// test-only upgrade cannot override
    #[error("image is already confirmed on the device")]
    #[diagnostic(code(smp_client::upgrade::already_confirmed))]
    AlreadyConfirmed,
    /// Reconnecting after the device reset failed
    #[error("connection failed after device reset")]
    #[diagnostic(code(smp_client::upgrade::reconnect))]
    ConnectionFailedAfterReset(#[source] ConnectError),
    /// An upgrade was started while another one is running
    #[error("an upgrade is already in progress")]
    #[diagnostic(code(smp_client::upgrade::already_in_progress))]
    AlreadyInProgress,
    /// A response payload violated an upgrade invariant
    #[error("{0}")]
    #[diagnostic(code(smp_client::upgrade::unknown))]
    Unknown(String),
}

/// How many validate passes may be triggered by remedial actions (confirm
/// of the primary, device reset) before the upgrade gives up.
const MAX_VALIDATE_ATTEMPTS: usize = 4;

#[derive(Debug)]
struct PlanImage {
    image: UploadImage,
    uploaded: bool,
    tested: bool,
    confirmed: bool,
    /// hash already sits in the primary slot
    in_primary: bool,
}

enum RunOutcome {
    Complete,
    Cancelled,
}

/// The firmware upgrade orchestrator.
///
/// Owns the upgrade plan for exactly one run; the caller keeps the
/// orchestrator alive until [`start`](FirmwareUpgrader::start) returns.
/// Pause, resume and cancel requests arrive through the shared control
/// handle and may come from delegate callbacks or other threads.
pub struct FirmwareUpgrader {
    mode: UpgradeMode,
    configuration: UpgradeConfiguration,
    plan: Vec<PlanImage>,
    state: UpgradeState,
    control: UploadControl,
    erase_settings_sent: bool,
}

impl FirmwareUpgrader {
    /// Creates an upgrader for the given plan.
    pub fn new(
        mode: UpgradeMode,
        images: Vec<UploadImage>,
        configuration: UpgradeConfiguration,
    ) -> Result<Self, UpgradeError> {
        if images.is_empty() || images.iter().any(|image| image.data.is_empty()) {
            return Err(UpgradeError::Upload(UploadError::InvalidData));
        }
        Ok(Self {
            mode,
            configuration,
            plan: images
                .into_iter()
                .map(|image| PlanImage {
                    image,
                    uploaded: false,
                    tested: false,
                    confirmed: false,
                    in_primary: false,
                })
                .collect(),
            state: UpgradeState::None,
            control: UploadControl::default(),
            erase_settings_sent: false,
        })
    }

    /// The current state.
    pub fn state(&self) -> UpgradeState {
        self.state
    }

    /// The control handle shared with the upload engine. Clones stay valid
    /// while [`start`](Self::start) blocks, e.g. inside delegate callbacks.
    pub fn control(&self) -> UploadControl {
        self.control.clone()
    }

    /// Requests a pause of a running upload.
    pub fn pause(&self) {
        self.control.pause();
    }

    /// Requests that a paused upload resumes.
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Requests cancellation. Takes effect after the next in-flight
    /// response; safe from any context.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Runs the upgrade to completion.
    ///
    /// Delivers lifecycle events to `delegate`; exactly one of
    /// `upgrade_did_complete`, `upgrade_did_fail` or `upgrade_did_cancel`
    /// fires before this returns.
    pub fn start(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<(), UpgradeError> {
        if self.state.is_in_progress() {
            return Err(UpgradeError::AlreadyInProgress);
        }

        delegate.upgrade_did_start();
        match self.run(client, delegate) {
            Ok(RunOutcome::Complete) => {
                self.set_state(UpgradeState::Success, delegate);
                delegate.upgrade_did_complete();
                Ok(())
            }
            Ok(RunOutcome::Cancelled) => {
                let cancelled_in = self.state;
                self.state = UpgradeState::None;
                delegate.upgrade_did_cancel(cancelled_in);
                Ok(())
            }
            Err(error) => {
                let failed_in = self.state;
                self.state = UpgradeState::None;
                delegate.upgrade_did_fail(failed_in, &error);
                Err(error)
            }
        }
    }

    fn set_state(&mut self, new: UpgradeState, delegate: &mut dyn UpgradeDelegate) {
        if self.state != new {
            let previous = self.state;
            self.state = new;
            log::info!("upgrade state {previous} -> {new}");
            delegate.upgrade_state_changed(previous, new);
        }
    }

    fn run(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<RunOutcome, UpgradeError> {
        self.request_parameters(client, delegate);
        self.validate(client, delegate)?;

        if self
            .plan
            .iter()
            .all(|plan| plan.uploaded && plan.tested && plan.confirmed)
        {
            // Everything already installed and confirmed.
            return Ok(RunOutcome::Complete);
        }

        if let RunOutcome::Cancelled = self.upload(client, delegate)? {
            return Ok(RunOutcome::Cancelled);
        }
        self.erase_app_settings(client, delegate)?;

        match self.mode {
            UpgradeMode::TestOnly => {
                self.test(client, delegate)?;
                if self.needs_reset() {
                    self.reset_and_reconnect(client, delegate)?;
                }
                Ok(RunOutcome::Complete)
            }
            UpgradeMode::TestAndConfirm => {
                self.test(client, delegate)?;
                if self.needs_reset() {
                    self.reset_and_reconnect(client, delegate)?;
                }
                self.confirm_after_reset(client, delegate)?;
                Ok(RunOutcome::Complete)
            }
            UpgradeMode::ConfirmOnly => {
                self.confirm_before_reset(client, delegate)?;
                self.reset_and_reconnect(client, delegate)?;
                Ok(RunOutcome::Complete)
            }
        }
    }

    /// Step 1: probe the device transfer parameters.
    ///
    /// A failure is non-fatal: the upgrade proceeds with segmentation off
    /// and the settings erase disabled.
    fn request_parameters(&mut self, client: &mut SmpClient, delegate: &mut dyn UpgradeDelegate) {
        self.set_state(UpgradeState::RequestParameters, delegate);

        match client.os_parameters() {
            Ok(parameters) => {
                let buffer_size = if self.configuration.reassembly_buffer_size > 0 {
                    self.configuration.reassembly_buffer_size
                } else {
                    u64::from(parameters.buf_size)
                };
                client
                    .connection_mut()
                    .set_reassembly_buffer_size(buffer_size);
            }
            Err(error) => {
                if !error.is_not_supported() {
                    log::warn!("parameter probe failed: {error}");
                }
                self.configuration.erase_app_settings = false;
                client.connection_mut().set_reassembly_buffer_size(0);
            }
        }
    }

    /// Step 2: classify every plan image against the device slot states,
    /// taking remedial actions (confirm of the primary, device reset) and
    /// re-validating afterwards.
    fn validate(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<(), UpgradeError> {
        for _ in 0..MAX_VALIDATE_ATTEMPTS {
            self.set_state(UpgradeState::Validate, delegate);
            let slots = client.image_list()?;

            if !self.classify(client, delegate, &slots)? {
                return Ok(());
            }
        }
        Err(UpgradeError::Unknown(
            "device slot states did not converge during validation".to_string(),
        ))
    }

    /// One classification pass. Returns whether a re-validation is needed.
    fn classify(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
        slots: &[ImageSlotState],
    ) -> Result<bool, UpgradeError> {
        let test_only = self.mode == UpgradeMode::TestOnly;

        for index in 0..self.plan.len() {
            let image_index = self.plan[index].image.index;
            let hash = self.plan[index].image.hash;
            let primary = slots
                .iter()
                .find(|slot| slot.image == image_index && slot.slot == 0);
            let secondary = slots
                .iter()
                .find(|slot| slot.image == image_index && slot.slot == 1);

            let plan = &mut self.plan[index];
            plan.uploaded = false;
            plan.tested = false;
            plan.confirmed = false;
            plan.in_primary = false;

            if let Some(primary) = primary.filter(|slot| slot.hash == Some(hash)) {
                plan.uploaded = true;
                plan.tested = true;
                plan.in_primary = true;
                plan.confirmed = primary.confirmed || primary.permanent;
                continue;
            }

            let Some(secondary) = secondary else {
                continue;
            };

            if secondary.hash == Some(hash) {
                plan.uploaded = true;
                if secondary.permanent {
                    if test_only {
                        return Err(UpgradeError::AlreadyConfirmed);
                    }
                    plan.confirmed = true;
                } else if secondary.pending {
                    plan.tested = true;
                }
                continue;
            }

            if secondary.hash.is_some() && (secondary.permanent || secondary.confirmed) {
                // A different, already-confirmed image blocks the secondary
                // slot. Known device behavior: confirming the primary
                // releases the marker. Then look again.
                log::info!(
                    "image {image_index}: secondary slot holds a confirmed foreign image, \
                     confirming the primary"
                );
                let primary_hash = primary.and_then(|slot| slot.hash);
                client.image_confirm(primary_hash.as_ref())?;
                return Ok(true);
            }

            if secondary.hash.is_some() && secondary.pending {
                // A different pending image would swap on the next reset;
                // reset now to flush it, then look again.
                log::info!(
                    "image {image_index}: secondary slot holds a pending foreign image, \
                     resetting the device"
                );
                self.reset_and_reconnect(client, delegate)?;
                return Ok(true);
            }

            // The secondary holds stale data; the upload overwrites it.
        }

        Ok(false)
    }

    /// Step 3: upload every image the device does not already hold.
    fn upload(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<RunOutcome, UpgradeError> {
        let needed: Vec<UploadImage> = self
            .plan
            .iter()
            .filter(|plan| !plan.uploaded)
            .map(|plan| plan.image.clone())
            .collect();
        if needed.is_empty() {
            return Ok(RunOutcome::Complete);
        }

        self.set_state(UpgradeState::Upload, delegate);

        let mut uploader = ImageUploader::new(
            needed,
            UploadSettings {
                alignment: self.configuration.byte_alignment,
                pipeline_depth: self.configuration.pipeline_depth,
            },
        )?;
        uploader.set_control(self.control.clone());

        let mut adapter = ProgressAdapter { delegate };
        let mut outcome = uploader.start(client.connection_mut(), &mut adapter)?;
        loop {
            match outcome {
                UploadOutcome::Finished => break,
                UploadOutcome::Cancelled => return Ok(RunOutcome::Cancelled),
                UploadOutcome::Paused => {
                    if !self.wait_while_paused() {
                        // Cancelled while paused; nothing is in flight.
                        return Ok(RunOutcome::Cancelled);
                    }
                    outcome = uploader.continue_upload(client.connection_mut(), &mut adapter)?;
                }
            }
        }

        for plan in &mut self.plan {
            plan.uploaded = true;
        }
        Ok(RunOutcome::Complete)
    }

    /// Blocks while the upload is paused. Returns `false` on cancellation.
    fn wait_while_paused(&self) -> bool {
        loop {
            let request = self.control.take();
            if UploadControl::is_resume(request) {
                return true;
            }
            if UploadControl::is_cancel(request) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Step 4: erase the application settings partition, once.
    fn erase_app_settings(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<(), UpgradeError> {
        if !self.configuration.erase_app_settings || self.erase_settings_sent {
            return Ok(());
        }

        self.set_state(UpgradeState::EraseAppSettings, delegate);
        match client.basic_erase_app_settings() {
            Ok(()) => {}
            Err(error) if error.is_not_supported() => {
                log::info!("device does not support erasing app settings");
            }
            Err(error) => return Err(error.into()),
        }
        // Flag off so a rerun after reconnect does not erase again.
        self.erase_settings_sent = true;
        Ok(())
    }

    /// Step 5: mark every unconfirmed image for a test boot and verify it
    /// turned pending in the secondary slot.
    fn test(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<(), UpgradeError> {
        let untested: Vec<usize> = self
            .plan
            .iter()
            .enumerate()
            .filter(|(_, plan)| !plan.tested && !plan.confirmed)
            .map(|(index, _)| index)
            .collect();
        if untested.is_empty() {
            return Ok(());
        }

        self.set_state(UpgradeState::Test, delegate);
        for index in untested {
            let image_index = self.plan[index].image.index;
            let hash = self.plan[index].image.hash;

            let slots = client.image_test(&hash)?;
            let pending = slots.iter().any(|slot| {
                slot.image == image_index
                    && slot.slot == 1
                    && slot.hash == Some(hash)
                    && slot.pending
            });
            if !pending {
                return Err(UpgradeError::Unknown(format!(
                    "Image {image_index} not in pending state"
                )));
            }
            self.plan[index].tested = true;
        }
        Ok(())
    }

    /// Whether a reset is required before confirmation: some image still
    /// waits in the secondary slot.
    fn needs_reset(&self) -> bool {
        self.plan
            .iter()
            .any(|plan| !plan.confirmed && !plan.in_primary)
    }

    /// Step 6: reset the device, wait out the image swap and reconnect
    /// exactly once.
    fn reset_and_reconnect(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<(), UpgradeError> {
        self.set_state(UpgradeState::Reset, delegate);
        client.os_reset()?;

        // Transports without link supervision time out here; the device
        // resets either way.
        if client
            .connection_mut()
            .await_disconnect(DEFAULT_TIMEOUT)
            .is_err()
        {
            log::debug!("no disconnect observed after reset");
        }

        std::thread::sleep(self.configuration.estimated_swap_time);

        client
            .connection_mut()
            .connect()
            .map_err(UpgradeError::ConnectionFailedAfterReset)?;
        Ok(())
    }

    /// Step 7, test modes: after the post-test reboot the new image must sit
    /// in the primary slot; confirm it there and verify the marker.
    fn confirm_after_reset(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<(), UpgradeError> {
        self.set_state(UpgradeState::Confirm, delegate);

        let slots = client.image_list()?;
        for index in 0..self.plan.len() {
            let image_index = self.plan[index].image.index;
            let hash = self.plan[index].image.hash;

            let primary = slots
                .iter()
                .find(|slot| slot.image == image_index && slot.slot == 0)
                .ok_or_else(|| {
                    UpgradeError::Unknown(format!("Image {image_index} has no primary slot"))
                })?;
            if primary.hash != Some(hash) {
                return Err(UpgradeError::Unknown(format!(
                    "Image {image_index} did not boot into the primary slot"
                )));
            }

            if primary.confirmed || primary.permanent {
                self.plan[index].confirmed = true;
                continue;
            }

            let updated = client.image_confirm(Some(&hash))?;
            let confirmed = updated.iter().any(|slot| {
                slot.image == image_index
                    && slot.slot == 0
                    && slot.hash == Some(hash)
                    && (slot.confirmed || slot.permanent)
            });
            if !confirmed {
                return Err(UpgradeError::Unknown(format!(
                    "Image {image_index} not confirmed"
                )));
            }
            self.plan[index].confirmed = true;
        }
        Ok(())
    }

    /// Step 7, confirm-only: mark the image in the secondary slot permanent
    /// ahead of the reset. Images already pending from a test marker swap on
    /// their own and are skipped.
    fn confirm_before_reset(
        &mut self,
        client: &mut SmpClient,
        delegate: &mut dyn UpgradeDelegate,
    ) -> Result<(), UpgradeError> {
        self.set_state(UpgradeState::Confirm, delegate);

        for index in 0..self.plan.len() {
            if self.plan[index].confirmed || self.plan[index].tested {
                continue;
            }
            let image_index = self.plan[index].image.index;
            let hash = self.plan[index].image.hash;

            let slots = client.image_confirm(Some(&hash))?;
            let permanent = slots.iter().any(|slot| {
                slot.image == image_index
                    && slot.hash == Some(hash)
                    && (slot.permanent || slot.pending || (slot.slot == 0 && slot.confirmed))
            });
            if !permanent {
                return Err(UpgradeError::Unknown(format!(
                    "Image {image_index} not marked permanent"
                )));
            }
            self.plan[index].confirmed = true;
        }
        Ok(())
    }
}

/// Forwards upload progress into the upgrade delegate; completion and
/// cancellation are consumed through the engine outcome instead.
struct ProgressAdapter<'a> {
    delegate: &'a mut dyn UpgradeDelegate,
}

impl UploadDelegate for ProgressAdapter<'_> {
    fn upload_progress(&mut self, bytes_sent: u64, total: u64, timestamp: SystemTime) {
        self.delegate.upload_progress(bytes_sent, total, timestamp);
    }
}
