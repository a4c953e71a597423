// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The fault catalog (spec.md §4.3, C5). Each fault binds one of the two
//! proxy layers to either a TCP state (the `isForwarding` gate, or the
//! listener itself) or an interceptor, and exposes the same four-phase
//! lifecycle the registry drives: `simulate` (construction, handled by the
//! factory in `catalog.rs`) / `enable` / `resolve` / `cleanUp`.

pub mod tcp_faults;
pub mod ws_faults;

use async_trait::async_trait;
use serde::Serialize;

/// The public contract a fault's observable effect falls into (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultType {
    Nonfatal,
    NonfatalWithResume,
    Fatal,
}

/// A live fault instance (spec.md §3 `FaultSimulation`). `enable`/`resolve`
/// are idempotent from the registry's point of view - each fault decides
/// internally whether repeating the call has any further effect - and
/// `clean_up` must be safe to call from any state, including twice.
#[async_trait]
pub trait FaultSimulation: Send + Sync {
    fn fault_type(&self) -> FaultType;

    fn listen_port(&self) -> u16;

    /// Starts the bound proxy listening (spec.md §4.4: "call `proxy.start()`").
    async fn start(&self) -> std::io::Result<()>;

    async fn enable(&self);

    async fn resolve(&self);

    /// Shuts the listener and every open connection, and cancels any timer
    /// the fault owns (spec.md §9: "cancelling the fault must cancel the
    /// timer before closing sockets"). Idempotent.
    async fn clean_up(&self);
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyDescriptor {
    #[serde(rename = "listenPort")]
    pub listen_port: u16,
}
