// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The three TCP-layer faults (spec.md §4.3): they act on the TCP Tunnel's
//! listener and its `isForwarding` gate, never touching an interceptor.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::faults::{FaultSimulation, FaultType};
use crate::proxy::RealtimeProxy;
use crate::tcp_tunnel::TcpTunnel;

/// The transparent TCP fault (spec.md §4.3 `NullTransportFault`): the
/// listener stays up and `isForwarding` stays true for its whole life.
/// Exists to give the catalog and the testable "transparency" property
/// (spec.md §8) a fault with no observable effect.
pub struct NullTransportFault {
    tunnel: Arc<TcpTunnel>,
}

impl NullTransportFault {
    pub fn new(tunnel: Arc<TcpTunnel>) -> Self {
        Self { tunnel }
    }
}

#[async_trait]
impl FaultSimulation for NullTransportFault {
    fn fault_type(&self) -> FaultType {
        FaultType::Nonfatal
    }

    fn listen_port(&self) -> u16 {
        self.tunnel.listen_port()
    }

    async fn start(&self) -> std::io::Result<()> {
        self.tunnel.start().await
    }

    async fn enable(&self) {}

    async fn resolve(&self) {}

    async fn clean_up(&self) {
        self.tunnel.stop().await;
    }
}

/// Closes the listener while enabled, so that connect attempts fail with
/// `ECONNREFUSED` (spec.md §4.3 `TcpConnectionRefused`). Existing connections
/// are not the point of this fault; `TcpTunnel::stop` closing them too is an
/// acceptable side effect.
pub struct TcpConnectionRefused {
    tunnel: Arc<TcpTunnel>,
}

impl TcpConnectionRefused {
    pub fn new(tunnel: Arc<TcpTunnel>) -> Self {
        Self { tunnel }
    }
}

#[async_trait]
impl FaultSimulation for TcpConnectionRefused {
    fn fault_type(&self) -> FaultType {
        FaultType::Nonfatal
    }

    fn listen_port(&self) -> u16 {
        self.tunnel.listen_port()
    }

    async fn start(&self) -> std::io::Result<()> {
        self.tunnel.start().await
    }

    async fn enable(&self) {
        self.tunnel.stop().await;
    }

    async fn resolve(&self) {
        if let Err(e) = self.tunnel.start().await {
            debug!("TcpConnectionRefused: failed to restart listener on resolve: {}", e);
        }
    }

    async fn clean_up(&self) {
        self.tunnel.stop().await;
    }
}

/// How long `TcpConnectionUnresponsive` holds the forwarding gate closed
/// before self-healing. spec.md §4.3 leaves the exact window ("N seconds")
/// unspecified; see DESIGN.md for the chosen default.
const UNRESPONSIVE_WINDOW: Duration = Duration::from_secs(5);

/// Freezes byte forwarding without touching the TCP connection itself
/// (spec.md §4.3 `TcpConnectionUnresponsive`): existing sockets stay open,
/// no bytes flow for a fixed window, then forwarding resumes on its own
/// unless `resolve` cancels the timer first.
pub struct TcpConnectionUnresponsive {
    tunnel: Arc<TcpTunnel>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TcpConnectionUnresponsive {
    pub fn new(tunnel: Arc<TcpTunnel>) -> Self {
        Self {
            tunnel,
            timer: Mutex::new(None),
        }
    }

    async fn cancel_timer(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl FaultSimulation for TcpConnectionUnresponsive {
    fn fault_type(&self) -> FaultType {
        FaultType::Nonfatal
    }

    fn listen_port(&self) -> u16 {
        self.tunnel.listen_port()
    }

    async fn start(&self) -> std::io::Result<()> {
        self.tunnel.start().await
    }

    async fn enable(&self) {
        self.cancel_timer().await;
        self.tunnel.set_forwarding(false);
        let flag = self.tunnel.forwarding_flag();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(UNRESPONSIVE_WINDOW).await;
            flag.store(true, Ordering::Relaxed);
        });
        *self.timer.lock().await = Some(handle);
    }

    async fn resolve(&self) {
        self.cancel_timer().await;
        self.tunnel.set_forwarding(true);
    }

    async fn clean_up(&self) {
        self.cancel_timer().await;
        self.tunnel.stop().await;
    }
}
