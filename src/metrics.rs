// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! In-process counters, in the shape of the teacher's
//! `noise-proxy::metrics::NoiseProxyMetrics`, without committing to a
//! `prometheus` exporter (no metrics surface is part of this spec; this
//! exists so faults and tests can assert on connection counts).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct TunnelMetrics {
    tcp_open_success: AtomicU64,
    tcp_open_failed: AtomicU64,
    tcp_close_ok: AtomicU64,
    tcp_close_error: AtomicU64,
    bytes_gated: AtomicU64,
}

impl TunnelMetrics {
    pub fn account_successful_tcp_open(&self) {
        self.tcp_open_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_failed_tcp_open(&self) {
        self.tcp_open_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_normal_tcp_close(&self) {
        self.tcp_close_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_tcp_close_due_error(&self) {
        self.tcp_close_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_bytes_gated(&self, n: u64) {
        self.bytes_gated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn successful_tcp_opens(&self) -> u64 {
        self.tcp_open_success.load(Ordering::Relaxed)
    }

    pub fn bytes_gated_total(&self) -> u64 {
        self.bytes_gated.load(Ordering::Relaxed)
    }
}
