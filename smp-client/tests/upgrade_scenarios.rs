//! End-to-end upgrade scenarios against the scripted in-memory device.

mod common;

use std::time::{Duration, SystemTime};

use common::{DeviceState, MockTransport, Slot, image_data, image_hash};
use smp_client::SmpClient;
use smp_client::client::EchoError;
use smp_client::upgrade::{
    FirmwareUpgrader, UpgradeConfiguration, UpgradeDelegate, UpgradeError, UpgradeMode,
    UpgradeState,
};
use smp_client::upload::{UploadControl, UploadImage};

#[derive(Default)]
struct Recorder {
    started: u32,
    states: Vec<UpgradeState>,
    progress: Vec<(u64, u64)>,
    completions: u32,
    failures: Vec<UpgradeState>,
    cancellations: Vec<UpgradeState>,
    /// cancel via this handle once progress crosses one half
    cancel_at_half: Option<UploadControl>,
    events_after_cancel: u32,
}

impl Recorder {
    fn cancelled(&self) -> bool {
        !self.cancellations.is_empty()
    }
}

impl UpgradeDelegate for Recorder {
    fn upgrade_did_start(&mut self) {
        self.started += 1;
    }

    fn upgrade_state_changed(&mut self, _previous: UpgradeState, new: UpgradeState) {
        if self.cancelled() {
            self.events_after_cancel += 1;
        }
        self.states.push(new);
    }

    fn upgrade_did_complete(&mut self) {
        if self.cancelled() {
            self.events_after_cancel += 1;
        }
        self.completions += 1;
    }

    fn upgrade_did_fail(&mut self, state: UpgradeState, _error: &UpgradeError) {
        if self.cancelled() {
            self.events_after_cancel += 1;
        }
        self.failures.push(state);
    }

    fn upgrade_did_cancel(&mut self, state: UpgradeState) {
        if self.cancelled() {
            self.events_after_cancel += 1;
        }
        self.cancellations.push(state);
    }

    fn upload_progress(&mut self, bytes_sent: u64, total: u64, _timestamp: SystemTime) {
        if self.cancelled() {
            self.events_after_cancel += 1;
        }
        self.progress.push((bytes_sent, total));

        if bytes_sent * 2 >= total {
            if let Some(control) = self.cancel_at_half.take() {
                control.cancel();
            }
        }
    }
}

fn instant_swap() -> UpgradeConfiguration {
    UpgradeConfiguration {
        estimated_swap_time: Duration::ZERO,
        ..Default::default()
    }
}

fn plan_image(index: u32, data: Vec<u8>) -> UploadImage {
    let hash = image_hash(&data);
    UploadImage { index, data, hash }
}

fn primary_slot_hash(state: &DeviceState, image: u32) -> Option<[u8; 32]> {
    state
        .slots
        .iter()
        .find(|slot| slot.image == image && slot.slot == 0)
        .and_then(|slot| slot.hash)
}

#[test]
fn s1_single_image_confirm_only_happy_path() {
    let data = image_data(4096, 7);
    let plan = plan_image(0, data.clone());

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running"))],
        params: Some((256, 4)),
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);
    client.set_upload_mtu(256).unwrap();

    let mut upgrader =
        FirmwareUpgrader::new(UpgradeMode::ConfirmOnly, vec![plan.clone()], instant_swap())
            .unwrap();
    let mut recorder = Recorder::default();

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.started, 1);
    assert_eq!(recorder.completions, 1);
    assert!(recorder.failures.is_empty());
    assert_eq!(
        recorder.states,
        vec![
            UpgradeState::RequestParameters,
            UpgradeState::Validate,
            UpgradeState::Upload,
            UpgradeState::Confirm,
            UpgradeState::Reset,
            UpgradeState::Success,
        ]
    );

    // Progress is monotonic and reaches the image size exactly.
    assert!(
        recorder
            .progress
            .windows(2)
            .all(|pair| pair[0].0 <= pair[1].0)
    );
    assert_eq!(recorder.progress.last().unwrap(), &(4096, 4096));

    let state = state.lock().unwrap();
    assert_eq!(state.uploaded_data(0).unwrap(), &data[..]);
    assert_eq!(state.reset_count, 1);
    // Reconnected exactly once, after the reset.
    assert_eq!(state.connect_count, 1);
    assert_eq!(primary_slot_hash(&state, 0), Some(plan.hash));
}

#[test]
fn s3_dual_image_test_and_confirm() {
    let data_a = image_data(2000, 1);
    let data_b = image_data(1500, 2);
    let plan_a = plan_image(0, data_a.clone());
    let plan_b = plan_image(1, data_b.clone());

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![
            Slot::primary(0, image_hash(b"old a")),
            Slot::primary(1, image_hash(b"old b")),
        ],
        params: Some((256, 4)),
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);
    client.set_upload_mtu(256).unwrap();

    let mut upgrader = FirmwareUpgrader::new(
        UpgradeMode::TestAndConfirm,
        vec![plan_a.clone(), plan_b.clone()],
        UpgradeConfiguration {
            pipeline_depth: 2,
            ..instant_swap()
        },
    )
    .unwrap();
    let mut recorder = Recorder::default();

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.completions, 1);
    assert_eq!(
        recorder.states,
        vec![
            UpgradeState::RequestParameters,
            UpgradeState::Validate,
            UpgradeState::Upload,
            UpgradeState::Test,
            UpgradeState::Reset,
            UpgradeState::Confirm,
            UpgradeState::Success,
        ]
    );
    assert_eq!(recorder.progress.last().unwrap(), &(3500, 3500));

    let state = state.lock().unwrap();
    assert_eq!(state.uploaded_data(0).unwrap(), &data_a[..]);
    assert_eq!(state.uploaded_data(1).unwrap(), &data_b[..]);
    assert_eq!(state.test_count, 2);
    assert_eq!(state.confirm_count, 2);
    assert_eq!(state.reset_count, 1);
    assert_eq!(state.connect_count, 1);
    assert_eq!(primary_slot_hash(&state, 0), Some(plan_a.hash));
    assert_eq!(primary_slot_hash(&state, 1), Some(plan_b.hash));
    let primaries_confirmed = state
        .slots
        .iter()
        .filter(|slot| slot.slot == 0)
        .all(|slot| slot.confirmed);
    assert!(primaries_confirmed);
}

#[test]
fn s4_pre_uploaded_pending_secondary_skips_upload_and_test() {
    let data = image_data(3000, 9);
    let plan = plan_image(0, data.clone());

    let mut pending_secondary = Slot::secondary(0, plan.hash);
    pending_secondary.pending = true;

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running")), pending_secondary],
        params: Some((256, 4)),
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);
    client.set_upload_mtu(256).unwrap();

    let mut upgrader =
        FirmwareUpgrader::new(UpgradeMode::TestAndConfirm, vec![plan.clone()], instant_swap())
            .unwrap();
    let mut recorder = Recorder::default();

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.completions, 1);
    assert_eq!(
        recorder.states,
        vec![
            UpgradeState::RequestParameters,
            UpgradeState::Validate,
            UpgradeState::Reset,
            UpgradeState::Confirm,
            UpgradeState::Success,
        ]
    );

    let state = state.lock().unwrap();
    assert_eq!(state.upload_chunk_count, 0);
    assert_eq!(state.test_count, 0);
    assert_eq!(state.reset_count, 1);
    assert_eq!(state.connect_count, 1);
    assert_eq!(primary_slot_hash(&state, 0), Some(plan.hash));
}

#[test]
fn s5_cancellation_mid_upload_delivers_exactly_one_cancel() {
    let data = image_data(8192, 3);
    let plan = plan_image(0, data);

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running"))],
        params: Some((256, 4)),
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);
    client.set_upload_mtu(256).unwrap();

    let mut upgrader = FirmwareUpgrader::new(
        UpgradeMode::TestAndConfirm,
        vec![plan],
        UpgradeConfiguration {
            pipeline_depth: 2,
            ..instant_swap()
        },
    )
    .unwrap();
    let mut recorder = Recorder {
        cancel_at_half: Some(upgrader.control()),
        ..Default::default()
    };

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.cancellations, vec![UpgradeState::Upload]);
    assert_eq!(recorder.events_after_cancel, 0);
    assert_eq!(recorder.completions, 0);
    assert!(recorder.failures.is_empty());
    assert_eq!(upgrader.state(), UpgradeState::None);

    let state = state.lock().unwrap();
    // The transfer stopped short of the image size.
    assert!(state.unique_uploaded_bytes(0) < 8192);
    assert_eq!(state.reset_count, 0);
}

#[test]
fn s6_echo_size_guard_fails_locally() {
    let (state, transport) = MockTransport::new(DeviceState::default());
    let mut client = SmpClient::new(transport);

    // One byte over the limit: 8 header + 6 map overhead + 2462 text bytes.
    let message = "x".repeat(2462);
    let result = client.os_echo(&message);
    assert!(matches!(result, Err(EchoError::MessageOverLimit(2476))));

    // The transport never saw the request.
    assert_eq!(state.lock().unwrap().request_count, 0);

    // A regular echo still goes through.
    assert_eq!(client.os_echo("hello").unwrap(), "hello");
    assert_eq!(state.lock().unwrap().request_count, 1);
}

#[test]
fn validate_already_confirmed_secondary_fails_test_only() {
    let data = image_data(2048, 5);
    let plan = plan_image(0, data);

    let mut permanent_secondary = Slot::secondary(0, plan.hash);
    permanent_secondary.permanent = true;

    let (_state, transport) = MockTransport::new(DeviceState {
        slots: vec![
            Slot::primary(0, image_hash(b"running")),
            permanent_secondary,
        ],
        params: Some((256, 4)),
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);

    let mut upgrader =
        FirmwareUpgrader::new(UpgradeMode::TestOnly, vec![plan], instant_swap()).unwrap();
    let mut recorder = Recorder::default();

    let result = upgrader.start(&mut client, &mut recorder);
    assert!(matches!(result, Err(UpgradeError::AlreadyConfirmed)));
    assert_eq!(recorder.failures, vec![UpgradeState::Validate]);
    assert_eq!(recorder.completions, 0);
    assert_eq!(upgrader.state(), UpgradeState::None);
}

#[test]
fn validate_already_confirmed_secondary_completes_confirm_only() {
    let data = image_data(2048, 5);
    let plan = plan_image(0, data);

    let mut permanent_secondary = Slot::secondary(0, plan.hash);
    permanent_secondary.permanent = true;

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![
            Slot::primary(0, image_hash(b"running")),
            permanent_secondary,
        ],
        params: Some((256, 4)),
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);

    let mut upgrader =
        FirmwareUpgrader::new(UpgradeMode::ConfirmOnly, vec![plan.clone()], instant_swap())
            .unwrap();
    let mut recorder = Recorder::default();

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.completions, 1);
    let state = state.lock().unwrap();
    // The image was marked confirmed right away: no upload, no new confirm
    // command.
    assert_eq!(state.upload_chunk_count, 0);
    assert_eq!(state.confirm_count, 0);
    assert_eq!(state.reset_count, 1);
    assert_eq!(primary_slot_hash(&state, 0), Some(plan.hash));
}

#[test]
fn validate_foreign_confirmed_secondary_confirms_primary_first() {
    let data = image_data(2048, 8);
    let plan = plan_image(0, data.clone());
    let running = image_hash(b"running");

    let mut foreign_secondary = Slot::secondary(0, image_hash(b"foreign"));
    foreign_secondary.confirmed = true;

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, running), foreign_secondary],
        params: Some((256, 4)),
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);
    client.set_upload_mtu(256).unwrap();

    let mut upgrader =
        FirmwareUpgrader::new(UpgradeMode::ConfirmOnly, vec![plan.clone()], instant_swap())
            .unwrap();
    let mut recorder = Recorder::default();

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.completions, 1);

    let state = state.lock().unwrap();
    // One confirm to unblock the primary, one to mark the new image.
    assert_eq!(state.confirm_count, 2);
    assert_eq!(state.uploaded_data(0).unwrap(), &data[..]);
    assert_eq!(primary_slot_hash(&state, 0), Some(plan.hash));
}

#[test]
fn validate_foreign_pending_secondary_resets_first() {
    let data = image_data(2048, 4);
    let plan = plan_image(0, data.clone());

    let mut foreign_pending = Slot::secondary(0, image_hash(b"foreign"));
    foreign_pending.pending = true;

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running")), foreign_pending],
        params: Some((256, 4)),
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);
    client.set_upload_mtu(256).unwrap();

    let mut upgrader =
        FirmwareUpgrader::new(UpgradeMode::TestAndConfirm, vec![plan.clone()], instant_swap())
            .unwrap();
    let mut recorder = Recorder::default();

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.completions, 1);
    let state = state.lock().unwrap();
    // One reset to flush the foreign pending image, one for the test boot.
    assert_eq!(state.reset_count, 2);
    assert_eq!(state.connect_count, 2);
    assert_eq!(primary_slot_hash(&state, 0), Some(plan.hash));
}

#[test]
fn unsupported_parameter_probe_is_non_fatal() {
    let data = image_data(1024, 6);
    let plan = plan_image(0, data.clone());

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running"))],
        // No parameters command on this device.
        params: None,
        supports_settings_erase: true,
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);
    client.set_upload_mtu(256).unwrap();

    let mut upgrader = FirmwareUpgrader::new(
        UpgradeMode::ConfirmOnly,
        vec![plan],
        UpgradeConfiguration {
            erase_app_settings: true,
            ..instant_swap()
        },
    )
    .unwrap();
    let mut recorder = Recorder::default();

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.completions, 1);
    let state = state.lock().unwrap();
    assert_eq!(state.uploaded_data(0).unwrap(), &data[..]);
    // The erase step was disabled by the failed probe.
    assert_eq!(state.settings_erase_count, 0);
    assert!(!recorder.states.contains(&UpgradeState::EraseAppSettings));
}

#[test]
fn erase_app_settings_runs_once_when_supported() {
    let data = image_data(1024, 6);
    let plan = plan_image(0, data);

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running"))],
        params: Some((256, 4)),
        supports_settings_erase: true,
        ..Default::default()
    });
    let mut client = SmpClient::new(transport);
    client.set_upload_mtu(256).unwrap();

    let mut upgrader = FirmwareUpgrader::new(
        UpgradeMode::ConfirmOnly,
        vec![plan],
        UpgradeConfiguration {
            erase_app_settings: true,
            ..instant_swap()
        },
    )
    .unwrap();
    let mut recorder = Recorder::default();

    upgrader.start(&mut client, &mut recorder).unwrap();

    assert_eq!(recorder.completions, 1);
    assert!(recorder.states.contains(&UpgradeState::EraseAppSettings));
    assert_eq!(state.lock().unwrap().settings_erase_count, 1);
}
