// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The static fault catalog (spec.md §4.3): the fixed list of names
//! `GET /faults` enumerates, and the factory that turns a name plus the
//! process's listen/target configuration into a fresh `FaultSimulation`
//! (spec.md §3: "a factory `simulate(id) -> FaultSimulation`" - `id` itself
//! is opaque to construction and only matters to the registry that stores
//! the result under it).

use std::sync::Arc;

use crate::faults::tcp_faults::{NullTransportFault, TcpConnectionRefused, TcpConnectionUnresponsive};
use crate::faults::ws_faults;
use crate::faults::FaultSimulation;
use crate::tcp_tunnel::TcpTunnel;
use crate::ws_terminator::WsTerminator;

/// The twelve names spec.md §4.3 and §8 scenario 1 require `GET /faults` to
/// enumerate, in no particular order.
pub const FAULT_NAMES: [&str; 12] = [
    "NullTransportFault",
    "NullApplicationLayerFault",
    "TcpConnectionRefused",
    "TcpConnectionUnresponsive",
    "AttachUnresponsive",
    "DetachUnresponsive",
    "DisconnectWithFailedResume",
    "EnterFailedWithNonfatalNack",
    "UpdateFailedWithNonfatalNack",
    "DisconnectAndSuspend",
    "ReenterOnResumeFailed",
    "EnterUnresponsive",
];

pub fn is_known(name: &str) -> bool {
    FAULT_NAMES.contains(&name)
}

/// Builds a fresh, not-yet-started `FaultSimulation` for `name`, binding it
/// to a brand-new proxy on `listen_host:listen_port` forwarding to
/// `target_host:target_port`. Returns `None` for an unrecognized name.
pub fn build(
    name: &str,
    listen_host: String,
    listen_port: u16,
    target_host: String,
    target_port: u16,
) -> Option<Arc<dyn FaultSimulation>> {
    match name {
        "NullTransportFault" => {
            let tunnel = Arc::new(TcpTunnel::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(NullTransportFault::new(tunnel)))
        }
        "TcpConnectionRefused" => {
            let tunnel = Arc::new(TcpTunnel::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(TcpConnectionRefused::new(tunnel)))
        }
        "TcpConnectionUnresponsive" => {
            let tunnel = Arc::new(TcpTunnel::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(TcpConnectionUnresponsive::new(tunnel)))
        }
        "NullApplicationLayerFault" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::null_application_layer_fault(terminator)))
        }
        "AttachUnresponsive" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::attach_unresponsive(terminator)))
        }
        "DetachUnresponsive" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::detach_unresponsive(terminator)))
        }
        "EnterUnresponsive" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::enter_unresponsive(terminator)))
        }
        "EnterFailedWithNonfatalNack" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::enter_failed_with_nonfatal_nack(terminator)))
        }
        "UpdateFailedWithNonfatalNack" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::update_failed_with_nonfatal_nack(terminator)))
        }
        "DisconnectWithFailedResume" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::disconnect_with_failed_resume(terminator)))
        }
        "ReenterOnResumeFailed" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::reenter_on_resume_failed(terminator)))
        }
        "DisconnectAndSuspend" => {
            let terminator = Arc::new(WsTerminator::new(listen_host, listen_port, target_host, target_port));
            Some(Arc::new(ws_faults::DisconnectAndSuspend::new(terminator)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_exactly_twelve_names() {
        assert_eq!(FAULT_NAMES.len(), 12);
    }

    #[test]
    fn every_cataloged_name_builds_a_simulation() {
        for name in FAULT_NAMES {
            let simulation = build(name, "127.0.0.1".into(), 0, "example.invalid".into(), 443);
            assert!(simulation.is_some(), "{} should be buildable", name);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!(!is_known("NotARealFault"));
        assert!(build("NotARealFault", "127.0.0.1".into(), 0, "example.invalid".into(), 443).is_none());
    }
}
