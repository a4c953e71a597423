// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Typed, round-trip-preserving view of the realtime handshake query string
//! (spec.md §3, C4). `None` means "absent"; absence must be preserved
//! upstream. Any other value is forwarded verbatim.

use url::form_urlencoded;

/// The recognized key set (spec.md §3): `clientId`, `connectionSerial`,
/// `resume`, `key`, `heartbeats`, `v`, `format`, `agent`. Each has a named
/// accessor below; everything else in the query string is carried through
/// unexamined.
const RECOGNIZED_KEYS: [&str; 8] = [
    "clientId",
    "connectionSerial",
    "resume",
    "key",
    "heartbeats",
    "v",
    "format",
    "agent",
];

/// `pairs` holds every key/value pair from the handshake query string, in the
/// exact order the client sent them - recognized or not. Rewriting a
/// recognized key (e.g. stripping `resume`) updates or removes its entry in
/// place rather than moving it, so re-serializing preserves the client's
/// original key order (spec.md §4.2 step 2: "reapply... in the original key
/// order").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pairs: Vec<(String, String)>,
}

impl ConnectionParams {
    /// Parses a raw query string (as found after `?` in the upgrade request)
    /// into a `ConnectionParams`, preserving arrival order of every pair.
    pub fn from_query_string(query: &str) -> Self {
        let pairs = form_urlencoded::parse(query.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        Self { pairs }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Sets `key` to `value`, updating the existing entry in place if one
    /// exists (preserving its position) or appending a new one at the end;
    /// `None` removes the entry entirely.
    fn set(&mut self, key: &str, value: Option<String>) {
        match value {
            Some(value) => match self.pairs.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value,
                None => self.pairs.push((key.to_string(), value)),
            },
            None => self.pairs.retain(|(k, _)| k != key),
        }
    }

    pub fn client_id(&self) -> Option<&str> {
        self.get("clientId")
    }

    pub fn connection_serial(&self) -> Option<&str> {
        self.get("connectionSerial")
    }

    pub fn resume(&self) -> Option<&str> {
        self.get("resume")
    }

    pub fn key(&self) -> Option<&str> {
        self.get("key")
    }

    pub fn heartbeats(&self) -> Option<&str> {
        self.get("heartbeats")
    }

    pub fn v(&self) -> Option<&str> {
        self.get("v")
    }

    pub fn format(&self) -> Option<&str> {
        self.get("format")
    }

    pub fn agent(&self) -> Option<&str> {
        self.get("agent")
    }

    /// Re-serializes every pair in its original arrival order. Recognized
    /// keys that were stripped (e.g. via `without_resume`) are simply absent
    /// from `pairs` and so are skipped, same as an unrecognized key never
    /// present in the first place.
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// Strips the `resume` parameter, forcing a fresh session upstream.
    /// Used by `DisconnectWithFailedResume` (spec.md §4.3).
    pub fn without_resume(mut self) -> Self {
        self.set("resume", None);
        self
    }

    pub fn has_resume(&self) -> bool {
        self.resume().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_recognized_keys() {
        let query = "clientId=abc&v=1.2&format=msgpack";
        let params = ConnectionParams::from_query_string(query);
        assert_eq!(params.client_id(), Some("abc"));
        assert_eq!(params.v(), Some("1.2"));
        assert_eq!(params.format(), Some("msgpack"));
        assert_eq!(params.resume(), None);

        let rebuilt = ConnectionParams::from_query_string(&params.to_query_string());
        assert_eq!(params, rebuilt);
    }

    #[test]
    fn reserializes_in_original_arrival_order_not_canonical_order() {
        // `v` is the last key in RECOGNIZED_KEYS' declaration order but
        // arrives first here - the rebuilt query string must keep it first.
        let query = "v=1.2&clientId=abc";
        let params = ConnectionParams::from_query_string(query);
        assert_eq!(params.to_query_string(), "v=1.2&clientId=abc");
    }

    #[test]
    fn absent_keys_remain_absent() {
        let params = ConnectionParams::from_query_string("clientId=abc");
        assert_eq!(params.resume(), None);
        assert!(!params.to_query_string().contains("resume"));
    }

    #[test]
    fn without_resume_strips_only_resume_and_keeps_surrounding_order() {
        let params = ConnectionParams::from_query_string("clientId=abc&resume=token123&v=1.2");
        let stripped = params.without_resume();
        assert_eq!(stripped.resume(), None);
        assert_eq!(stripped.client_id(), Some("abc"));
        assert_eq!(stripped.to_query_string(), "clientId=abc&v=1.2");
    }

    #[test]
    fn unrecognized_keys_survive_round_trip_in_place() {
        let query = "clientId=abc&foo=bar&v=1.2";
        let params = ConnectionParams::from_query_string(query);
        assert_eq!(params.to_query_string(), query);
    }

    #[test]
    fn recognizes_exactly_the_eight_handshake_keys() {
        assert_eq!(RECOGNIZED_KEYS.len(), 8);
        let query = RECOGNIZED_KEYS
            .iter()
            .map(|k| format!("{k}=x"))
            .collect::<Vec<_>>()
            .join("&");
        let params = ConnectionParams::from_query_string(&query);
        for key in RECOGNIZED_KEYS {
            assert_eq!(params.get(key), Some("x"));
        }
    }
}
