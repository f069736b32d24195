//! Upload engine scenarios against the scripted in-memory device.

mod common;

use std::time::SystemTime;

use common::{DeviceState, MockTransport, Slot, image_data, image_hash};
use smp_client::connection::Connection;
use smp_client::suit::{SuitEnvelopeUploader, envelope_digest};
use smp_client::upload::{
    ImageUploader, UploadDelegate, UploadImage, UploadOutcome, UploadSettings, UploadState,
};

#[derive(Default)]
struct Recorder {
    progress: Vec<(u64, u64)>,
    finishes: u32,
    cancellations: u32,
}

impl UploadDelegate for Recorder {
    fn upload_progress(&mut self, bytes_sent: u64, total: u64, _timestamp: SystemTime) {
        self.progress.push((bytes_sent, total));
    }

    fn upload_did_finish(&mut self) {
        self.finishes += 1;
    }

    fn upload_did_cancel(&mut self) {
        self.cancellations += 1;
    }
}

fn plan_image(index: u32, data: Vec<u8>) -> UploadImage {
    let hash = image_hash(&data);
    UploadImage { index, data, hash }
}

#[test]
fn s2_mtu_downgrade_restarts_the_transfer() {
    let data = image_data(4096, 11);
    let plan = plan_image(0, data.clone());

    let (state, transport) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running"))],
        insufficient_mtu_after: Some((3, 128)),
        ..Default::default()
    });
    let mut connection = Connection::new(transport);
    connection.set_mtu(256).unwrap();

    let mut uploader = ImageUploader::new(vec![plan], UploadSettings::default()).unwrap();
    let mut recorder = Recorder::default();

    let outcome = uploader.start(&mut connection, &mut recorder).unwrap();
    assert_eq!(outcome, UploadOutcome::Finished);
    assert_eq!(recorder.finishes, 1);

    // The engine adopted the reported MTU.
    assert_eq!(connection.mtu(), 128);

    let state = state.lock().unwrap();
    assert!(state.mtu_rejected);
    // Every packet after the downgrade respected the new MTU.
    assert!(state.max_packet_after_reject <= 128);
    // The transfer restarted from offset 0 and delivered the whole image.
    assert_eq!(state.sessions[&0].starts, 2);
    assert_eq!(state.unique_uploaded_bytes(0), 4096);
    assert_eq!(state.uploaded_data(0).unwrap(), &data[..]);
}

#[test]
fn restart_produces_the_same_wire_payloads_as_a_fresh_start() {
    let data = image_data(3000, 12);
    let plan = plan_image(0, data.clone());

    // Run A: MTU downgrade after three chunks forces a restart at 128.
    let (state_a, transport_a) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running"))],
        insufficient_mtu_after: Some((3, 128)),
        ..Default::default()
    });
    let mut connection_a = Connection::new(transport_a);
    connection_a.set_mtu(256).unwrap();
    let mut uploader_a = ImageUploader::new(vec![plan.clone()], UploadSettings::default()).unwrap();
    uploader_a
        .start(&mut connection_a, &mut Recorder::default())
        .unwrap();

    // Run B: fresh start of the same plan directly at 128.
    let (state_b, transport_b) = MockTransport::new(DeviceState {
        slots: vec![Slot::primary(0, image_hash(b"running"))],
        ..Default::default()
    });
    let mut connection_b = Connection::new(transport_b);
    connection_b.set_mtu(128).unwrap();
    let mut uploader_b = ImageUploader::new(vec![plan], UploadSettings::default()).unwrap();
    uploader_b
        .start(&mut connection_b, &mut Recorder::default())
        .unwrap();

    let state_a = state_a.lock().unwrap();
    let state_b = state_b.lock().unwrap();

    // Chunks after the restart (the first three went out at MTU 256).
    let restarted = &state_a.upload_payloads[3..];
    assert_eq!(restarted, &state_b.upload_payloads[..]);
}

#[test]
fn multi_image_restart_keeps_finished_images() {
    let data_a = image_data(1000, 13);
    let data_b = image_data(800, 14);

    // Dry run to learn how many chunks the first image needs at MTU 256.
    let (dry_state, dry_transport) = MockTransport::new(DeviceState::default());
    let mut dry_connection = Connection::new(dry_transport);
    dry_connection.set_mtu(256).unwrap();
    ImageUploader::new(
        vec![plan_image(0, data_a.clone())],
        UploadSettings::default(),
    )
    .unwrap()
    .start(&mut dry_connection, &mut Recorder::default())
    .unwrap();
    let first_image_chunks = dry_state.lock().unwrap().upload_chunk_count;

    // Real run: the downgrade hits within the second image.
    let (state, transport) = MockTransport::new(DeviceState {
        insufficient_mtu_after: Some((first_image_chunks + 1, 128)),
        ..Default::default()
    });
    let mut connection = Connection::new(transport);
    connection.set_mtu(256).unwrap();

    let mut uploader = ImageUploader::new(
        vec![
            plan_image(0, data_a.clone()),
            plan_image(1, data_b.clone()),
        ],
        UploadSettings::default(),
    )
    .unwrap();
    let outcome = uploader
        .start(&mut connection, &mut Recorder::default())
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Finished);

    let state = state.lock().unwrap();
    // The finished first image was not uploaded again.
    assert_eq!(state.sessions[&0].starts, 1);
    // The second image restarted from offset 0.
    assert_eq!(state.sessions[&1].starts, 2);
    assert_eq!(state.uploaded_data(0).unwrap(), &data_a[..]);
    assert_eq!(state.uploaded_data(1).unwrap(), &data_b[..]);
}

#[test]
fn pause_and_resume_continue_from_the_acknowledged_offset() {
    let data = image_data(4096, 15);
    let plan = plan_image(0, data.clone());

    let (state, transport) = MockTransport::new(DeviceState::default());
    let mut connection = Connection::new(transport);
    connection.set_mtu(256).unwrap();

    let mut uploader = ImageUploader::new(vec![plan], UploadSettings::default()).unwrap();
    let control = uploader.control();

    // Pause before the engine runs: the first loop iteration drains into
    // Paused without dispatching anything new.
    control.pause();
    let mut recorder = Recorder::default();
    let outcome = uploader.start(&mut connection, &mut recorder).unwrap();
    assert_eq!(outcome, UploadOutcome::Paused);
    assert_eq!(uploader.state(), UploadState::Paused);

    let outcome = uploader
        .continue_upload(&mut connection, &mut recorder)
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Finished);
    assert_eq!(uploader.state(), UploadState::Idle);
    assert_eq!(recorder.finishes, 1);

    let state = state.lock().unwrap();
    assert_eq!(state.uploaded_data(0).unwrap(), &data[..]);
    // One continuous session, no restart.
    assert_eq!(state.sessions[&0].starts, 1);
}

#[test]
fn suit_envelope_upload_round_trip() {
    let envelope = image_data(2000, 21);
    let digest = envelope_digest(&envelope);

    let (state, transport) = MockTransport::new(DeviceState::default());
    let mut connection = Connection::new(transport);
    connection.set_mtu(256).unwrap();

    let mut uploader = SuitEnvelopeUploader::new(envelope.clone(), digest).unwrap();
    let mut recorder = Recorder::default();

    let outcome = uploader.start(&mut connection, &mut recorder).unwrap();
    assert_eq!(outcome, UploadOutcome::Finished);
    assert_eq!(recorder.finishes, 1);
    assert!(
        recorder
            .progress
            .windows(2)
            .all(|pair| pair[0].0 <= pair[1].0)
    );
    assert_eq!(recorder.progress.last().unwrap(), &(2000, 2000));

    let state = state.lock().unwrap();
    let session = state.envelope.as_ref().unwrap();
    assert_eq!(session.data, envelope);
    assert_eq!(session.starts, 1);
}
