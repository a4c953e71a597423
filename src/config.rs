// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Static configuration. Per spec.md §6 there are exactly four knobs that
//! matter at runtime (listen host/port, upstream host/port) plus where the
//! control API itself binds; all are overridable via CLI flag or environment
//! variable, following the `clap` `derive` + `env` pattern `ckir-rsdev`
//! settles on for its servers.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "fault-proxy", about = "Fault-injection proxy for realtime SDK testing")]
pub struct Config {
    /// Address the control API (REST) listens on.
    #[arg(long, env = "FAULT_PROXY_CONTROL_ADDR", default_value = "0.0.0.0:8080")]
    pub control_addr: String,

    /// Host each fault's proxy listener binds to.
    #[arg(long, env = "FAULT_PROXY_LISTEN_HOST", default_value = "127.0.0.1")]
    pub listen_host: String,

    /// Port each fault's proxy listener binds to.
    #[arg(long, env = "FAULT_PROXY_LISTEN_PORT", default_value_t = 13579)]
    pub listen_port: u16,

    /// Upstream realtime service host.
    #[arg(long, env = "FAULT_PROXY_TARGET_HOST", default_value = "realtime.ably.io")]
    pub target_host: String,

    /// Upstream realtime service port.
    #[arg(long, env = "FAULT_PROXY_TARGET_PORT", default_value_t = 443)]
    pub target_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_addr: "0.0.0.0:8080".to_string(),
            listen_host: "127.0.0.1".to_string(),
            listen_port: 13579,
            target_host: "realtime.ably.io".to_string(),
            target_port: 443,
        }
    }
}
