// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Pluggable per-connection interception (spec.md §3 C3, §9): composition of
//! two orthogonal capabilities - rewriting connection parameters at upgrade
//! time, and transforming frames in flight - covers the whole fault
//! catalog without a deep type hierarchy.
//!
//! Implementations must be safe under concurrent invocation from both
//! forwarding tasks of a connection (spec.md §5), since one `Interceptor`
//! instance is shared by both directions.

use crate::frame::{Action, Direction, Frame};
use crate::params::ConnectionParams;

pub trait Interceptor: Send + Sync {
    /// Called once per connection, before the upstream socket is opened.
    /// Faults rewrite `params` here (e.g. stripping `resume`).
    fn intercept_connection(&self, params: ConnectionParams) -> ConnectionParams {
        params
    }

    /// Called once per inbound frame. Interceptors MUST NOT panic or return
    /// an `Err` here (spec.md §7: "interceptors MUST NOT raise") - a
    /// protocol-decode problem is simply a pass-through action.
    fn intercept_frame(&self, direction: Direction, frame: Frame) -> Vec<Action>;
}

/// The identity interceptor (spec.md §4.2): forwards every frame unchanged
/// in its original direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughInterceptor;

impl Interceptor for PassThroughInterceptor {
    fn intercept_frame(&self, direction: Direction, frame: Frame) -> Vec<Action> {
        vec![Action::forward(direction, frame)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_forwards_every_frame_once() {
        let interceptor = PassThroughInterceptor;
        let actions = interceptor.intercept_frame(Direction::Upstream, Frame::text("hello"));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].direction, Direction::Upstream);
        assert!(!actions[0].send_and_close);
    }

    #[test]
    fn pass_through_closes_on_close_frames() {
        let interceptor = PassThroughInterceptor;
        let actions = interceptor.intercept_frame(Direction::Downstream, Frame::close());
        assert!(actions[0].send_and_close);
    }

    #[test]
    fn pass_through_connection_params_are_unchanged() {
        let interceptor = PassThroughInterceptor;
        let params = ConnectionParams::from_query_string("clientId=abc");
        let out = interceptor.intercept_connection(params.clone());
        assert_eq!(params, out);
    }
}
