//! Scripted in-memory SMP device used by the integration tests.
//!
//! The device speaks the raw BLE framing, reassembles fragmented packets,
//! answers synchronously and models just enough MCUboot slot semantics for
//! the upgrade scenarios: uploads fill the secondary slot, test/confirm set
//! the pending/permanent markers, and a reset applies the pending swap.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ciborium::Value;
use sha2::{Digest, Sha256};
use smp_client::header::{Operation, SmpHeader};
use smp_client::packet::{self, Scheme};
use smp_client::transport::{
    ConnectError, ConnectOutcome, ConnectionState, ReceiveError, SendError, Transport,
};

#[derive(Clone, Debug, Default)]
pub struct Slot {
    pub image: u32,
    pub slot: u32,
    pub hash: Option<[u8; 32]>,
    pub version: Option<String>,
    pub bootable: bool,
    pub pending: bool,
    pub confirmed: bool,
    pub active: bool,
    pub permanent: bool,
}

impl Slot {
    pub fn primary(image: u32, hash: [u8; 32]) -> Self {
        Slot {
            image,
            slot: 0,
            hash: Some(hash),
            version: Some("1.0.0".to_string()),
            bootable: true,
            confirmed: true,
            active: true,
            ..Default::default()
        }
    }

    pub fn secondary(image: u32, hash: [u8; 32]) -> Self {
        Slot {
            image,
            slot: 1,
            hash: Some(hash),
            version: Some("1.1.0".to_string()),
            bootable: true,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct UploadSession {
    pub len: u64,
    pub next: u64,
    pub data: Vec<u8>,
    pub written: Vec<bool>,
    /// number of times a chunk with offset 0 started this session
    pub starts: u32,
}

#[derive(Default)]
pub struct DeviceState {
    pub slots: Vec<Slot>,
    pub sessions: HashMap<u32, UploadSession>,
    pub envelope: Option<UploadSession>,
    /// `(buf_size, buf_count)`; `None` answers the probe with NotSupported
    pub params: Option<(u32, u32)>,
    pub supports_settings_erase: bool,
    pub connected: bool,
    pub connect_count: u32,
    pub reset_count: u32,
    pub settings_erase_count: u32,
    pub test_count: u32,
    pub confirm_count: u32,
    pub upload_chunk_count: u32,
    /// total number of requests the device processed
    pub request_count: u32,
    /// payloads of image upload requests, in arrival order
    pub upload_payloads: Vec<Vec<u8>>,
    /// reject the image-upload send after this many accepted chunks
    pub insufficient_mtu_after: Option<(u32, usize)>,
    pub mtu_rejected: bool,
    /// largest packet observed after the MTU rejection
    pub max_packet_after_reject: usize,
    /// image the running upload session belongs to; continuation chunks
    /// carry no image number
    pub current_upload_image: u32,
    pub rx: Vec<u8>,
    pub tx: VecDeque<Vec<u8>>,
}

impl DeviceState {
    pub fn unique_uploaded_bytes(&self, image: u32) -> usize {
        self.sessions
            .get(&image)
            .map(|session| session.written.iter().filter(|written| **written).count())
            .unwrap_or(0)
    }

    pub fn uploaded_data(&self, image: u32) -> Option<&[u8]> {
        self.sessions
            .get(&image)
            .map(|session| session.data.as_slice())
    }

    fn slot_mut(&mut self, image: u32, slot: u32) -> Option<&mut Slot> {
        self.slots
            .iter_mut()
            .find(|record| record.image == image && record.slot == slot)
    }

    fn respond(&mut self, request: SmpHeader, payload: Value) {
        let header = SmpHeader::new(
            request.operation.response(),
            request.group,
            request.sequence,
            request.command_id,
        );
        let packet =
            packet::build_packet(Scheme::Ble, header, &payload).expect("response must encode");
        self.tx.push_back(packet);
    }

    fn process(&mut self, packet: Vec<u8>) {
        self.request_count += 1;
        let parsed = packet::parse_packet(Scheme::Ble, &packet).expect("well-formed request");
        let header = parsed.header;
        let payload: Value =
            ciborium::from_reader(parsed.payload.as_slice()).expect("CBOR request body");

        let response = match (header.group, header.command_id, header.operation) {
            (0, 0, Operation::Read) => {
                let d = map_str(&payload, "d").unwrap_or_default();
                cbor_map(vec![("r", Value::Text(d))])
            }
            (0, 5, Operation::Write) => {
                self.reset_count += 1;
                self.connected = false;
                self.apply_reset();
                cbor_map(vec![])
            }
            (0, 6, Operation::Read) => match self.params {
                Some((buf_size, buf_count)) => cbor_map(vec![
                    ("buf_size", Value::Integer(buf_size.into())),
                    ("buf_count", Value::Integer(buf_count.into())),
                ]),
                None => cbor_map(vec![("rc", Value::Integer(8.into()))]),
            },
            (1, 0, Operation::Read) => self.image_list(),
            (1, 0, Operation::Write) => self.set_image_state(&payload),
            (1, 1, Operation::Write) => {
                self.upload_payloads.push(parsed.payload.clone());
                self.upload_chunk(&payload)
            }
            (63, 0, Operation::Write) => {
                if self.supports_settings_erase {
                    self.settings_erase_count += 1;
                    cbor_map(vec![])
                } else {
                    cbor_map(vec![("rc", Value::Integer(8.into()))])
                }
            }
            (66, 2, Operation::Write) => self.envelope_chunk(&payload),
            _ => cbor_map(vec![("rc", Value::Integer(8.into()))]),
        };

        self.respond(header, response);
    }

    fn image_list(&self) -> Value {
        let images: Vec<Value> = self
            .slots
            .iter()
            .map(|slot| {
                let mut entries = vec![
                    ("image", Value::Integer(slot.image.into())),
                    ("slot", Value::Integer(slot.slot.into())),
                ];
                if let Some(version) = &slot.version {
                    entries.push(("version", Value::Text(version.clone())));
                }
                if let Some(hash) = slot.hash {
                    entries.push(("hash", Value::Bytes(hash.to_vec())));
                }
                entries.extend([
                    ("bootable", Value::Bool(slot.bootable)),
                    ("pending", Value::Bool(slot.pending)),
                    ("confirmed", Value::Bool(slot.confirmed)),
                    ("active", Value::Bool(slot.active)),
                    ("permanent", Value::Bool(slot.permanent)),
                ]);
                cbor_map(entries)
            })
            .collect();
        cbor_map(vec![("images", Value::Array(images))])
    }

    fn set_image_state(&mut self, payload: &Value) -> Value {
        let confirm = map_bool(payload, "confirm").unwrap_or(false);
        let hash = map_bytes(payload, "hash").and_then(|bytes| <[u8; 32]>::try_from(bytes).ok());

        if confirm {
            self.confirm_count += 1;
            match hash {
                Some(hash) => {
                    let Some(target) = self
                        .slots
                        .iter_mut()
                        .find(|record| record.hash == Some(hash))
                    else {
                        return cbor_map(vec![("rc", Value::Integer(5.into()))]);
                    };
                    if target.slot == 1 {
                        target.permanent = true;
                        target.pending = true;
                    } else {
                        target.confirmed = true;
                        let image = target.image;
                        // Confirming the primary releases any stale marker
                        // on the secondary.
                        if let Some(secondary) = self.slot_mut(image, 1) {
                            secondary.confirmed = false;
                            secondary.permanent = false;
                        }
                    }
                }
                None => {
                    if let Some(active) = self.slots.iter_mut().find(|record| record.active) {
                        active.confirmed = true;
                        let image = active.image;
                        if let Some(secondary) = self.slot_mut(image, 1) {
                            secondary.confirmed = false;
                            secondary.permanent = false;
                        }
                    }
                }
            }
        } else {
            self.test_count += 1;
            let Some(hash) = hash else {
                return cbor_map(vec![("rc", Value::Integer(3.into()))]);
            };
            let Some(target) = self
                .slots
                .iter_mut()
                .find(|record| record.slot == 1 && record.hash == Some(hash))
            else {
                return cbor_map(vec![("rc", Value::Integer(5.into()))]);
            };
            target.pending = true;
        }

        self.image_list()
    }

    fn upload_chunk(&mut self, payload: &Value) -> Value {
        self.upload_chunk_count += 1;

        let Some(off) = map_u64(payload, "off") else {
            return cbor_map(vec![("rc", Value::Integer(3.into()))]);
        };
        let image = match map_u64(payload, "image") {
            Some(image) => image as u32,
            None if off == 0 => 0,
            None => self.current_upload_image,
        };
        if off == 0 {
            self.current_upload_image = image;
        }
        let Some(data) = map_bytes(payload, "data") else {
            return cbor_map(vec![("rc", Value::Integer(3.into()))]);
        };

        if off == 0 {
            let Some(len) = map_u64(payload, "len") else {
                return cbor_map(vec![("rc", Value::Integer(3.into()))]);
            };
            let starts = self
                .sessions
                .get(&image)
                .map(|session| session.starts)
                .unwrap_or(0);
            self.sessions.insert(
                image,
                UploadSession {
                    len,
                    next: 0,
                    data: vec![0; len as usize],
                    written: vec![false; len as usize],
                    starts: starts + 1,
                },
            );
        }

        let Some(session) = self.sessions.get_mut(&image) else {
            return cbor_map(vec![("rc", Value::Integer(6.into()))]);
        };
        let position = off as usize;
        if position + data.len() > session.data.len() {
            return cbor_map(vec![("rc", Value::Integer(3.into()))]);
        }
        session.data[position..position + data.len()].copy_from_slice(&data);
        for written in &mut session.written[position..position + data.len()] {
            *written = true;
        }
        session.next = off + data.len() as u64;

        if session.next == session.len {
            let hash: [u8; 32] = Sha256::digest(&session.data).into();
            match self.slot_mut(image, 1) {
                Some(secondary) => {
                    secondary.hash = Some(hash);
                    secondary.version = Some("2.0.0".to_string());
                    secondary.bootable = true;
                    secondary.pending = false;
                    secondary.confirmed = false;
                    secondary.permanent = false;
                }
                None => {
                    let mut slot = Slot::secondary(image, hash);
                    slot.version = Some("2.0.0".to_string());
                    self.slots.push(slot);
                }
            }
        }

        let next = self.sessions[&image].next;
        cbor_map(vec![("off", Value::Integer(next.into()))])
    }

    fn envelope_chunk(&mut self, payload: &Value) -> Value {
        let Some(off) = map_u64(payload, "off") else {
            return cbor_map(vec![("rc", Value::Integer(3.into()))]);
        };
        let Some(data) = map_bytes(payload, "data") else {
            return cbor_map(vec![("rc", Value::Integer(3.into()))]);
        };

        if off == 0 {
            let Some(len) = map_u64(payload, "len") else {
                return cbor_map(vec![("rc", Value::Integer(3.into()))]);
            };
            let starts = self
                .envelope
                .as_ref()
                .map(|session| session.starts)
                .unwrap_or(0);
            self.envelope = Some(UploadSession {
                len,
                next: 0,
                data: vec![0; len as usize],
                written: vec![false; len as usize],
                starts: starts + 1,
            });
        }

        let Some(session) = self.envelope.as_mut() else {
            return cbor_map(vec![("rc", Value::Integer(6.into()))]);
        };
        let position = off as usize;
        session.data[position..position + data.len()].copy_from_slice(&data);
        for written in &mut session.written[position..position + data.len()] {
            *written = true;
        }
        session.next = off + data.len() as u64;

        cbor_map(vec![("off", Value::Integer(session.next.into()))])
    }

    /// MCUboot reset semantics: a pending secondary swaps into the primary
    /// slot; a permanent marker survives the swap as `confirmed`.
    fn apply_reset(&mut self) {
        let images: Vec<u32> = self.slots.iter().map(|slot| slot.image).collect();
        for image in images {
            let Some(secondary_index) = self
                .slots
                .iter()
                .position(|record| record.image == image && record.slot == 1)
            else {
                continue;
            };
            if !(self.slots[secondary_index].pending || self.slots[secondary_index].permanent) {
                continue;
            }
            let Some(primary_index) = self
                .slots
                .iter()
                .position(|record| record.image == image && record.slot == 0)
            else {
                continue;
            };

            let was_permanent = self.slots[secondary_index].permanent;
            let new_primary_hash = self.slots[secondary_index].hash;
            let new_primary_version = self.slots[secondary_index].version.clone();
            let old_primary_hash = self.slots[primary_index].hash;
            let old_primary_version = self.slots[primary_index].version.clone();

            let primary = &mut self.slots[primary_index];
            primary.hash = new_primary_hash;
            primary.version = new_primary_version;
            primary.bootable = true;
            primary.active = true;
            primary.pending = false;
            primary.confirmed = was_permanent;
            primary.permanent = was_permanent;

            let secondary = &mut self.slots[secondary_index];
            secondary.hash = old_primary_hash;
            secondary.version = old_primary_version;
            secondary.pending = false;
            secondary.confirmed = false;
            secondary.permanent = false;
            secondary.active = false;
        }
    }
}

fn cbor_map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(key, value)| (Value::Text(key.to_string()), value))
            .collect(),
    )
}

fn map_get<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    payload.as_map().and_then(|entries| {
        entries
            .iter()
            .find(|(entry_key, _)| entry_key.as_text() == Some(key))
            .map(|(_, value)| value)
    })
}

fn map_str(payload: &Value, key: &str) -> Option<String> {
    map_get(payload, key).and_then(|value| value.as_text().map(str::to_string))
}

fn map_bool(payload: &Value, key: &str) -> Option<bool> {
    map_get(payload, key).and_then(Value::as_bool)
}

fn map_u64(payload: &Value, key: &str) -> Option<u64> {
    map_get(payload, key)
        .and_then(Value::as_integer)
        .and_then(|integer| u64::try_from(integer).ok())
}

fn map_bytes(payload: &Value, key: &str) -> Option<Vec<u8>> {
    map_get(payload, key).and_then(|value| value.as_bytes().cloned())
}

/// Transport half of the mock: feeds packets into the device state and
/// reads prepared responses back out.
pub struct MockTransport {
    pub state: Arc<Mutex<DeviceState>>,
}

impl MockTransport {
    pub fn new(state: DeviceState) -> (Arc<Mutex<DeviceState>>, Self) {
        let state = Arc::new(Mutex::new(DeviceState {
            connected: true,
            ..state
        }));
        (
            state.clone(),
            MockTransport { state },
        )
    }
}

impl Transport for MockTransport {
    fn scheme(&self) -> Scheme {
        Scheme::Ble
    }

    fn connect(&mut self) -> Result<ConnectOutcome, ConnectError> {
        let mut state = self.state.lock().unwrap();
        state.connected = true;
        state.connect_count += 1;
        Ok(ConnectOutcome::Connected)
    }

    fn close(&mut self) {
        self.state.lock().unwrap().connected = false;
    }

    fn state(&self) -> ConnectionState {
        if self.state.lock().unwrap().connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn send(&mut self, packet: &[u8], _timeout: Duration) -> Result<(), SendError> {
        let mut state = self.state.lock().unwrap();

        if state.mtu_rejected {
            state.max_packet_after_reject = state.max_packet_after_reject.max(packet.len());
        }

        // Reject the next image upload chunk once the configured number of
        // chunks went through. Only at a packet boundary, where the header
        // is readable.
        if state.rx.is_empty() {
            if let Some((after, new_mtu)) = state.insufficient_mtu_after {
                if !state.mtu_rejected && state.upload_chunk_count >= after {
                    if let Ok(header) = SmpHeader::decode(packet) {
                        if header.group == 1 && header.command_id == 1 {
                            state.mtu_rejected = true;
                            return Err(SendError::InsufficientMtu(new_mtu));
                        }
                    }
                }
            }
        }

        state.rx.extend_from_slice(packet);

        // Reassemble and process every complete packet in the buffer.
        loop {
            if state.rx.len() < 8 {
                break;
            }
            let header = SmpHeader::decode(&state.rx).expect("8 bytes buffered");
            let whole = 8 + usize::from(header.length);
            if state.rx.len() < whole {
                break;
            }
            let packet: Vec<u8> = state.rx.drain(..whole).collect();
            state.process(packet);
        }

        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>, ReceiveError> {
        self.state
            .lock()
            .unwrap()
            .tx
            .pop_front()
            .ok_or(ReceiveError::Timeout)
    }
}

/// SHA256 helper matching what the device computes over a finished upload.
pub fn image_hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Deterministic pseudo-random image content.
pub fn image_data(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|index| (index as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
