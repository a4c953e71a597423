// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Minimal, read-only introspection of the realtime service's packed binary
//! wire format (spec.md §4.3, §9: "introduce a tiny read-only decoder that
//! extracts `{action, channel, clientId?}`... do not aim for a full codec").
//!
//! The real wire format is the upstream service's private contract and is
//! intentionally opaque to this proxy except for the handful of fields the
//! fault catalog needs to recognize. What's decoded here is a small
//! tag-length-value envelope: one action byte followed by zero or more
//! `(tag, len, bytes)` fields, terminated by a zero tag. This is sufficient
//! to recognize `ATTACH`/`DETACH`/`PRESENCE`/`CONNECTED` messages and to
//! fabricate a matching `NACK`, which is all the catalog requires.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolAction {
    Heartbeat,
    Connect,
    Connected,
    Disconnect,
    Attach,
    Attached,
    Detach,
    Detached,
    Presence,
    Nack,
    Other(u8),
}

impl ProtocolAction {
    fn to_tag(self) -> u8 {
        match self {
            ProtocolAction::Heartbeat => 0,
            ProtocolAction::Connect => 1,
            ProtocolAction::Connected => 2,
            ProtocolAction::Disconnect => 3,
            ProtocolAction::Attach => 10,
            ProtocolAction::Attached => 11,
            ProtocolAction::Detach => 12,
            ProtocolAction::Detached => 13,
            ProtocolAction::Presence => 14,
            ProtocolAction::Nack => 15,
            ProtocolAction::Other(tag) => tag,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => ProtocolAction::Heartbeat,
            1 => ProtocolAction::Connect,
            2 => ProtocolAction::Connected,
            3 => ProtocolAction::Disconnect,
            10 => ProtocolAction::Attach,
            11 => ProtocolAction::Attached,
            12 => ProtocolAction::Detach,
            13 => ProtocolAction::Detached,
            14 => ProtocolAction::Presence,
            15 => ProtocolAction::Nack,
            other => ProtocolAction::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Enter,
    Update,
    Leave,
    Other(u8),
}

impl PresenceAction {
    fn to_byte(self) -> u8 {
        match self {
            PresenceAction::Enter => 2,
            PresenceAction::Update => 3,
            PresenceAction::Leave => 1,
            PresenceAction::Other(b) => b,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            1 => PresenceAction::Leave,
            2 => PresenceAction::Enter,
            3 => PresenceAction::Update,
            other => PresenceAction::Other(other),
        }
    }
}

const TAG_CHANNEL: u8 = 1;
const TAG_CLIENT_ID: u8 = 2;
const TAG_PRESENCE_ACTION: u8 = 3;
const TAG_ERROR_CODE: u8 = 4;
const TAG_MSG_SERIAL: u8 = 5;
const TAG_END: u8 = 0;

/// The "non-fatal" error code band, per spec.md §4.3: `40000-49999`
/// excluding codes the realtime contract marks as terminal. The terminal
/// subrange below is reserved for faults flagged fatal in spec.md's table;
/// none of the non-fatal faults may fabricate a code inside it.
const TERMINAL_BAND_START: u32 = 49900;
const TERMINAL_BAND_END: u32 = 49999;
pub const DEFAULT_NONFATAL_NACK_CODE: u32 = 40140;

pub fn is_nonfatal_code(code: u32) -> bool {
    (40000..=49999).contains(&code) && !(TERMINAL_BAND_START..=TERMINAL_BAND_END).contains(&code)
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolMessage {
    pub channel: Option<String>,
    pub client_id: Option<String>,
    pub presence_action: Option<PresenceAction>,
    pub error_code: Option<u32>,
    pub msg_serial: Option<u64>,
}

/// Attempts to decode `payload` as a realtime protocol message. Returns
/// `None` if the bytes don't look like our envelope (too short, or a field
/// length runs past the buffer) - the caller forwards the frame unchanged in
/// that case and logs at debug, per spec.md §7 ("protocol-decode errors...
/// forwarded unchanged").
pub fn decode(payload: &Bytes) -> Option<(ProtocolAction, ProtocolMessage)> {
    if payload.is_empty() {
        return None;
    }
    let action = ProtocolAction::from_tag(payload[0]);
    let mut message = ProtocolMessage::default();
    let mut cursor = 1usize;

    loop {
        if cursor >= payload.len() {
            break;
        }
        let tag = payload[cursor];
        cursor += 1;
        if tag == TAG_END {
            break;
        }
        if cursor + 2 > payload.len() {
            return None;
        }
        let len = u16::from_be_bytes([payload[cursor], payload[cursor + 1]]) as usize;
        cursor += 2;
        if cursor + len > payload.len() {
            return None;
        }
        let field = &payload[cursor..cursor + len];
        cursor += len;

        match tag {
            TAG_CHANNEL => message.channel = Some(String::from_utf8_lossy(field).into_owned()),
            TAG_CLIENT_ID => message.client_id = Some(String::from_utf8_lossy(field).into_owned()),
            TAG_PRESENCE_ACTION if len == 1 => {
                message.presence_action = Some(PresenceAction::from_byte(field[0]))
            }
            TAG_ERROR_CODE if len == 4 => {
                message.error_code = Some(u32::from_be_bytes(field.try_into().ok()?))
            }
            TAG_MSG_SERIAL if len == 8 => {
                message.msg_serial = Some(u64::from_be_bytes(field.try_into().ok()?))
            }
            _ => {}
        }
    }

    Some((action, message))
}

fn put_field(buf: &mut BytesMut, tag: u8, bytes: &[u8]) {
    buf.put_u8(tag);
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

/// Encodes a protocol message back to the wire envelope, used only to
/// fabricate frames (NACKs, and tests). Forwarded frames are never
/// re-encoded - they pass through byte-for-byte.
pub fn encode(action: ProtocolAction, message: &ProtocolMessage) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(action.to_tag());
    if let Some(channel) = &message.channel {
        put_field(&mut buf, TAG_CHANNEL, channel.as_bytes());
    }
    if let Some(client_id) = &message.client_id {
        put_field(&mut buf, TAG_CLIENT_ID, client_id.as_bytes());
    }
    if let Some(presence_action) = message.presence_action {
        put_field(&mut buf, TAG_PRESENCE_ACTION, &[presence_action.to_byte()]);
    }
    if let Some(code) = message.error_code {
        put_field(&mut buf, TAG_ERROR_CODE, &code.to_be_bytes());
    }
    if let Some(serial) = message.msg_serial {
        put_field(&mut buf, TAG_MSG_SERIAL, &serial.to_be_bytes());
    }
    buf.put_u8(TAG_END);
    buf.freeze()
}

/// Fabricates a NACK carrying a non-fatal error code, echoing the channel of
/// the message it's refusing (spec.md §4.3: `EnterFailedWithNonfatalNack`,
/// `UpdateFailedWithNonfatalNack`, `ReenterOnResumeFailed`).
pub fn fabricate_nack(in_reply_to: &ProtocolMessage, error_code: u32) -> Bytes {
    debug_assert!(is_nonfatal_code(error_code));
    let message = ProtocolMessage {
        channel: in_reply_to.channel.clone(),
        client_id: in_reply_to.client_id.clone(),
        presence_action: in_reply_to.presence_action,
        error_code: Some(error_code),
        msg_serial: in_reply_to.msg_serial,
    };
    encode(ProtocolAction::Nack, &message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_presence_enter_message() {
        let message = ProtocolMessage {
            channel: Some("chat".to_string()),
            client_id: Some("alice".to_string()),
            presence_action: Some(PresenceAction::Enter),
            error_code: None,
            msg_serial: Some(7),
        };
        let encoded = encode(ProtocolAction::Presence, &message);
        let (action, decoded) = decode(&encoded).expect("should decode");
        assert_eq!(action, ProtocolAction::Presence);
        assert_eq!(decoded.channel.as_deref(), Some("chat"));
        assert_eq!(decoded.client_id.as_deref(), Some("alice"));
        assert_eq!(decoded.presence_action, Some(PresenceAction::Enter));
        assert_eq!(decoded.msg_serial, Some(7));
    }

    #[test]
    fn garbage_payload_fails_to_decode_instead_of_panicking() {
        let payload = Bytes::from_static(&[10, 1, 0, 200]);
        assert!(decode(&payload).is_none());
    }

    #[test]
    fn fabricated_nack_carries_nonfatal_code() {
        let original = ProtocolMessage {
            channel: Some("chat".to_string()),
            ..Default::default()
        };
        let nack = fabricate_nack(&original, DEFAULT_NONFATAL_NACK_CODE);
        let (action, decoded) = decode(&nack).unwrap();
        assert_eq!(action, ProtocolAction::Nack);
        assert_eq!(decoded.error_code, Some(DEFAULT_NONFATAL_NACK_CODE));
        assert!(is_nonfatal_code(decoded.error_code.unwrap()));
    }
}
