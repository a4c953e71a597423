// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The common surface both proxy layers (C1 TCP Tunnel, C2 WebSocket
//! Terminator) expose to the fault catalog and the control surface
//! (spec.md §4.1/§4.2: "Exposes the same `RealtimeProxy` surface as C1").

use async_trait::async_trait;

#[async_trait]
pub trait RealtimeProxy: Send + Sync {
    /// Binds the listener and spawns the acceptor task. Calling `start`
    /// twice is a no-op (spec.md §4.1).
    async fn start(&self) -> std::io::Result<()>;

    /// Closes the listener and every connection the proxy currently has
    /// open. Safe to call from any state, including before `start` or after
    /// a prior `stop` (spec.md §3: "cleanUp is safe from any state").
    async fn stop(&self);

    fn listen_host(&self) -> String;

    fn listen_port(&self) -> u16;
}
