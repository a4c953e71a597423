// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The simulation registry and control surface (spec.md §4.4, C6): a keyed
//! map of active `FaultSimulation`s, serialized by a single exclusive lock
//! that is never held across an `.await` (spec.md §5, §9: "never call into a
//! proxy while holding the registry lock").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use uuid::Uuid;

use crate::catalog;
use crate::error::ControlError;
use crate::faults::{FaultSimulation, FaultType, ProxyDescriptor};

/// Mirrors spec.md §3's state diagram. `created` isn't modeled separately -
/// by the time an entry is visible in the map, `simulate()` and `proxy.start()`
/// have already run (spec.md §4.4 `createSimulation`), so it starts at `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Idle,
    Active,
    Resolved,
}

struct Entry {
    simulation: Arc<dyn FaultSimulation>,
    state: LifecycleState,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub fault_type: FaultType,
    pub proxy: ProxyDescriptor,
}

pub struct SimulationRegistry {
    listen_host: String,
    listen_port: u16,
    target_host: String,
    target_port: u16,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SimulationRegistry {
    pub fn new(listen_host: String, listen_port: u16, target_host: String, target_port: u16) -> Self {
        Self {
            listen_host,
            listen_port,
            target_host,
            target_port,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn list_faults(&self) -> Vec<&'static str> {
        catalog::FAULT_NAMES.to_vec()
    }

    /// Generates a fresh id, constructs the fault's proxy and strategy,
    /// starts the proxy listening, and registers the result (spec.md §4.4
    /// `createSimulation`). The registry lock is only held for the map
    /// insert; proxy construction and `start()` happen before it's taken.
    pub async fn create_simulation(&self, name: &str) -> Result<SimulationDescriptor, ControlError> {
        let Some(canonical_name) = catalog::FAULT_NAMES.iter().find(|&&n| n == name).copied() else {
            return Err(ControlError::UnknownFault(name.to_string()));
        };
        let simulation = catalog::build(
            name,
            self.listen_host.clone(),
            self.listen_port,
            self.target_host.clone(),
            self.target_port,
        )
        .expect("name was just validated against the catalog");

        simulation.start().await?;

        let id = Uuid::new_v4().to_string();
        let fault_type = simulation.fault_type();
        let listen_port = simulation.listen_port();

        let entry = Entry {
            simulation,
            state: LifecycleState::Idle,
        };
        self.entries.lock().expect("registry lock poisoned").insert(id.clone(), entry);

        Ok(SimulationDescriptor {
            id,
            name: canonical_name.to_string(),
            fault_type,
            proxy: ProxyDescriptor { listen_port },
        })
    }

    /// Snapshots the simulation out of the map under the lock, then drives
    /// its `enable()` outside the lock - I/O never runs while the registry
    /// is held (spec.md §9).
    pub async fn enable(&self, id: &str) -> Result<(), ControlError> {
        let simulation = {
            let mut entries = self.entries.lock().expect("registry lock poisoned");
            let entry = entries.get_mut(id).ok_or_else(|| ControlError::UnknownSimulation(id.to_string()))?;
            if entry.state != LifecycleState::Idle {
                return Err(ControlError::LifecycleMisuse(id.to_string()));
            }
            entry.state = LifecycleState::Active;
            entry.simulation.clone()
        };
        simulation.enable().await;
        Ok(())
    }

    pub async fn resolve(&self, id: &str) -> Result<(), ControlError> {
        let simulation = {
            let mut entries = self.entries.lock().expect("registry lock poisoned");
            let entry = entries.get_mut(id).ok_or_else(|| ControlError::UnknownSimulation(id.to_string()))?;
            if entry.state != LifecycleState::Active {
                return Err(ControlError::LifecycleMisuse(id.to_string()));
            }
            entry.state = LifecycleState::Resolved;
            entry.simulation.clone()
        };
        simulation.resolve().await;
        Ok(())
    }

    /// Idempotent: a second `clean_up` on an id already removed from the map
    /// simply finds nothing to do and succeeds (spec.md §8 "lifecycle
    /// idempotence").
    pub async fn clean_up(&self, id: &str) -> Result<(), ControlError> {
        let simulation = self.entries.lock().expect("registry lock poisoned").remove(id).map(|e| e.simulation);
        if let Some(simulation) = simulation {
            simulation.clean_up().await;
        }
        Ok(())
    }
}
