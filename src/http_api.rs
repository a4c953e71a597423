// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The control API (spec.md §6): a thin `axum` dispatcher over
//! `SimulationRegistry`. Per spec.md §1's "Out of scope", the REST/HTTP
//! transport itself isn't part of the core's design surface - this module
//! exists only to expose the five operations spec.md §6 lists.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::ControlError;
use crate::registry::SimulationRegistry;

pub fn build_router(registry: Arc<SimulationRegistry>) -> Router {
    Router::new()
        .route("/faults", get(list_faults))
        .route("/faults/{name}/simulation", post(create_simulation))
        .route("/fault-simulations/{id}/enable", post(enable))
        .route("/fault-simulations/{id}/resolve", post(resolve))
        .route("/fault-simulations/{id}/clean-up", post(clean_up))
        .with_state(registry)
}

async fn list_faults(State(registry): State<Arc<SimulationRegistry>>) -> Json<Vec<&'static str>> {
    Json(registry.list_faults())
}

async fn create_simulation(
    State(registry): State<Arc<SimulationRegistry>>,
    Path(name): Path<String>,
) -> Result<Json<crate::registry::SimulationDescriptor>, ControlError> {
    let descriptor = registry.create_simulation(&name).await?;
    Ok(Json(descriptor))
}

async fn enable(
    State(registry): State<Arc<SimulationRegistry>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ControlError> {
    registry.enable(&id).await?;
    Ok(StatusCode::OK)
}

async fn resolve(
    State(registry): State<Arc<SimulationRegistry>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ControlError> {
    registry.resolve(&id).await?;
    Ok(StatusCode::OK)
}

async fn clean_up(
    State(registry): State<Arc<SimulationRegistry>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ControlError> {
    registry.clean_up(&id).await?;
    Ok(StatusCode::OK)
}
