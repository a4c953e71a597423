// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Fault-injection proxy for exercising a realtime pub/sub WebSocket SDK's
//! recovery logic: a dual-layer interception engine (raw TCP tunnel plus a
//! WebSocket-terminating proxy) and a catalog of reproducible failure modes,
//! driven by a small REST control surface.

pub mod catalog;
pub mod config;
pub mod error;
pub mod faults;
pub mod frame;
pub mod http_api;
pub mod interceptor;
pub mod metrics;
pub mod params;
pub mod proxy;
pub mod registry;
pub mod tcp_tunnel;
pub mod wire;
pub mod ws_terminator;
