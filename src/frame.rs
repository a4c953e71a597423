// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! WebSocket frame model shared between the terminator (C2) and interceptors
//! (C3). Deliberately independent of `tokio_tungstenite`'s own `Message` type
//! so that interceptors can be tested without pulling in a live socket.

use bytes::{Bytes, BytesMut};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Bytes,
    pub is_final: bool,
}

impl Frame {
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Text,
            payload: payload.into(),
            is_final: true,
        }
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Binary,
            payload: payload.into(),
            is_final: true,
        }
    }

    /// A close frame carrying no close code (spec.md §3: CLOSE frames still
    /// have a payload field, just possibly an empty one - this is the "peer
    /// dropped the connection without a close frame" case, not the common
    /// one).
    pub fn close() -> Self {
        Self {
            opcode: Opcode::Close,
            payload: Bytes::new(),
            is_final: true,
        }
    }

    /// A close frame carrying an RFC 6455 close code and reason, encoded into
    /// `payload` the same way the wire protocol itself encodes them (2-byte
    /// big-endian code followed by the UTF-8 reason). This is what lets
    /// `PassThroughInterceptor` forward a peer's real close code instead of
    /// silently downgrading every close to "no code".
    pub fn close_with(code: u16, reason: &str) -> Self {
        Self {
            opcode: Opcode::Close,
            payload: encode_close_payload(code, reason),
            is_final: true,
        }
    }

    pub fn is_close(&self) -> bool {
        self.opcode == Opcode::Close
    }
}

/// Encodes a close code/reason pair the way RFC 6455 §5.5.1 packs them into a
/// CLOSE frame's body: a 2-byte big-endian code followed by the UTF-8 reason.
///
/// `pub(crate)` because `ws_terminator`'s axum-side conversions (axum's own
/// `Message::Close` uses a distinct `CloseFrame` type from tungstenite's) need
/// the same encoding to stay consistent across both legs of a connection.
pub(crate) fn encode_close_payload(code: u16, reason: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + reason.len());
    buf.extend_from_slice(&code.to_be_bytes());
    buf.extend_from_slice(reason.as_bytes());
    buf.freeze()
}

/// Reverses `encode_close_payload`. Returns `None` for an empty payload (no
/// close code was sent) or a payload too short to hold a code, matching
/// `Message::Close(None)`/`AxMessage::Close(None)`.
pub(crate) fn decode_close_payload(payload: &Bytes) -> Option<(u16, String)> {
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Some((code, reason))
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(t) => Frame {
                opcode: Opcode::Text,
                payload: Bytes::from(t),
                is_final: true,
            },
            Message::Binary(b) => Frame {
                opcode: Opcode::Binary,
                payload: b,
                is_final: true,
            },
            Message::Ping(b) => Frame {
                opcode: Opcode::Ping,
                payload: b,
                is_final: true,
            },
            Message::Pong(b) => Frame {
                opcode: Opcode::Pong,
                payload: b,
                is_final: true,
            },
            Message::Close(Some(close)) => Frame::close_with(close.code.into(), &close.reason),
            Message::Close(None) => Frame::close(),
            Message::Frame(_) => Frame::close(),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame.opcode {
            Opcode::Text => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                Message::Text(text.into())
            }
            Opcode::Binary => Message::Binary(frame.payload),
            Opcode::Ping => Message::Ping(frame.payload),
            Opcode::Pong => Message::Pong(frame.payload),
            Opcode::Close => match decode_close_payload(&frame.payload) {
                Some((code, reason)) => Message::Close(Some(CloseFrame {
                    code: code.into(),
                    reason: reason.into(),
                })),
                None => Message::Close(None),
            },
        }
    }
}

/// Which leg of the connection a frame or action is headed towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client -> upstream
    Upstream,
    /// upstream -> client
    Downstream,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Upstream => Direction::Downstream,
            Direction::Downstream => Direction::Upstream,
        }
    }
}

/// A directive produced by an interceptor for a single inbound frame.
///
/// Default `send_and_close` is true iff the frame is a CLOSE frame, matching
/// spec.md §3.
#[derive(Debug, Clone)]
pub struct Action {
    pub direction: Direction,
    pub frame: Frame,
    pub send_and_close: bool,
}

impl Action {
    pub fn forward(direction: Direction, frame: Frame) -> Self {
        let send_and_close = frame.is_close();
        Self {
            direction,
            frame,
            send_and_close,
        }
    }

    pub fn forward_and_close(direction: Direction, frame: Frame) -> Self {
        Self {
            direction,
            frame,
            send_and_close: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_with_round_trips_code_and_reason_through_tungstenite_message() {
        let frame = Frame::close_with(1001, "going away");
        let message: Message = frame.into();
        match message {
            Message::Close(Some(close)) => {
                assert_eq!(u16::from(close.code), 1001);
                assert_eq!(close.reason.as_str(), "going away");
            }
            other => panic!("expected a populated close frame, got {other:?}"),
        }
    }

    #[test]
    fn close_without_code_round_trips_to_none() {
        let frame = Frame::close();
        let message: Message = frame.into();
        assert!(matches!(message, Message::Close(None)));
    }

    #[test]
    fn tungstenite_close_message_preserves_code_through_frame() {
        let message = Message::Close(Some(CloseFrame {
            code: 1000.into(),
            reason: "bye".into(),
        }));
        let frame: Frame = message.into();
        assert_eq!(decode_close_payload(&frame.payload), Some((1000, "bye".to_string())));
    }
}
