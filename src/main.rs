// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fault_proxy::config::Config;
use fault_proxy::http_api;
use fault_proxy::registry::SimulationRegistry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    info!(?config, "starting fault-injection proxy");

    let registry = Arc::new(SimulationRegistry::new(
        config.listen_host.clone(),
        config.listen_port,
        config.target_host.clone(),
        config.target_port,
    ));

    let router = http_api::build_router(registry);
    let listener = tokio::net::TcpListener::bind(&config.control_addr)
        .await
        .with_context(|| format!("failed to bind control API on {}", config.control_addr))?;

    info!("control API listening on {}", config.control_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control API server failed")?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
