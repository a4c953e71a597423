// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Error taxonomy for the proxy core.
//!
//! Mirrors the teacher's per-module error enums (`noise-proxy::frontend::Error`,
//! `noise-proxy::connector::Error`) rather than a single monolithic type: each
//! component owns the errors it can actually produce.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(thiserror::Error, Debug)]
pub enum TcpTunnelError {
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum WsTerminatorError {
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Upstream handshake error: {0}")]
    UpstreamHandshake(String),
}

/// Errors surfaced by the control API.
///
/// Lookup errors map to 404, lifecycle misuse maps to 409/400. The proxy core
/// never raises these on behalf of a connection - only the registry layer does.
#[derive(thiserror::Error, Debug)]
pub enum ControlError {
    #[error("unknown fault: {0}")]
    UnknownFault(String),

    #[error("unknown simulation id: {0}")]
    UnknownSimulation(String),

    #[error("simulation {0} cannot accept this operation in its current lifecycle state")]
    LifecycleMisuse(String),

    #[error("failed to start proxy listener: {0}")]
    ListenerStart(#[from] std::io::Error),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::UnknownFault(_) | ControlError::UnknownSimulation(_) => {
                StatusCode::NOT_FOUND
            }
            ControlError::LifecycleMisuse(_) => StatusCode::CONFLICT,
            ControlError::ListenerStart(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
