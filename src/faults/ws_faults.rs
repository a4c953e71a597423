// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The nine WebSocket-layer faults (spec.md §4.3). All but
//! `DisconnectAndSuspend` are expressed purely as an `Interceptor` installed
//! on the terminator; `DisconnectAndSuspend` instead drives the terminator's
//! accept gate and connection list directly, since its effect ("close
//! client-side WS, then reject new connects") has nothing to do with
//! in-flight frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::faults::{FaultSimulation, FaultType};
use crate::frame::{Action, Direction, Frame};
use crate::interceptor::{Interceptor, PassThroughInterceptor};
use crate::params::ConnectionParams;
use crate::proxy::RealtimeProxy;
use crate::wire::{self, DEFAULT_NONFATAL_NACK_CODE, ProtocolAction, ProtocolMessage, PresenceAction};
use crate::ws_terminator::WsTerminator;

/// Interceptors with one-shot or otherwise enable-scoped state implement
/// this to clear it each time the fault transitions idle -> active. The
/// stateless interceptors below (swallow, nack) just take the default.
pub trait ResettableInterceptor: Interceptor {
    fn reset(&self) {}
}

impl ResettableInterceptor for PassThroughInterceptor {}

/// Swallows upstream (client -> upstream) frames whose decoded action
/// matches `predicate`, forwarding everything else - and both directions'
/// non-matching traffic - unchanged. Backs `AttachUnresponsive`,
/// `DetachUnresponsive` and `EnterUnresponsive`.
pub struct SwallowingInterceptor {
    predicate: fn(ProtocolAction, &ProtocolMessage) -> bool,
}

impl SwallowingInterceptor {
    pub fn new(predicate: fn(ProtocolAction, &ProtocolMessage) -> bool) -> Self {
        Self { predicate }
    }
}

impl Interceptor for SwallowingInterceptor {
    fn intercept_frame(&self, direction: Direction, frame: Frame) -> Vec<Action> {
        if direction == Direction::Upstream {
            if let Some((action, message)) = wire::decode(&frame.payload) {
                if (self.predicate)(action, &message) {
                    return vec![];
                }
            }
        }
        vec![Action::forward(direction, frame)]
    }
}

impl ResettableInterceptor for SwallowingInterceptor {}

/// Recognizes upstream frames matching `predicate`, suppresses them, and
/// fabricates a NACK back to the client carrying `error_code` instead.
/// Backs `EnterFailedWithNonfatalNack` and `UpdateFailedWithNonfatalNack`.
pub struct NackingInterceptor {
    predicate: fn(ProtocolAction, &ProtocolMessage) -> bool,
    error_code: u32,
}

impl NackingInterceptor {
    pub fn new(predicate: fn(ProtocolAction, &ProtocolMessage) -> bool, error_code: u32) -> Self {
        Self { predicate, error_code }
    }
}

impl Interceptor for NackingInterceptor {
    fn intercept_frame(&self, direction: Direction, frame: Frame) -> Vec<Action> {
        if direction == Direction::Upstream {
            if let Some((action, message)) = wire::decode(&frame.payload) {
                if (self.predicate)(action, &message) {
                    let nack = wire::fabricate_nack(&message, self.error_code);
                    return vec![Action::forward(Direction::Downstream, Frame::binary(nack))];
                }
            }
        }
        vec![Action::forward(direction, frame)]
    }
}

impl ResettableInterceptor for NackingInterceptor {}

fn is_attach(action: ProtocolAction, _message: &ProtocolMessage) -> bool {
    action == ProtocolAction::Attach
}

fn is_detach(action: ProtocolAction, _message: &ProtocolMessage) -> bool {
    action == ProtocolAction::Detach
}

fn is_presence_enter(action: ProtocolAction, message: &ProtocolMessage) -> bool {
    action == ProtocolAction::Presence && message.presence_action == Some(PresenceAction::Enter)
}

fn is_presence_update(action: ProtocolAction, message: &ProtocolMessage) -> bool {
    action == ProtocolAction::Presence && message.presence_action == Some(PresenceAction::Update)
}

/// Closes the server-side (client-facing) WebSocket immediately after
/// forwarding the first `CONNECTED` frame seen after `enable`, then strips
/// `resume` from the next connection attempt so upstream can't resume the
/// torn-down session (spec.md §4.3 `DisconnectWithFailedResume`).
pub struct DisconnectWithFailedResumeInterceptor {
    triggered: AtomicBool,
}

impl DisconnectWithFailedResumeInterceptor {
    pub fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
        }
    }
}

impl Interceptor for DisconnectWithFailedResumeInterceptor {
    fn intercept_connection(&self, params: ConnectionParams) -> ConnectionParams {
        if params.has_resume() {
            params.without_resume()
        } else {
            params
        }
    }

    fn intercept_frame(&self, direction: Direction, frame: Frame) -> Vec<Action> {
        if direction == Direction::Downstream {
            if let Some((action, _)) = wire::decode(&frame.payload) {
                if action == ProtocolAction::Connected && !self.triggered.swap(true, Ordering::SeqCst) {
                    return vec![Action::forward_and_close(Direction::Downstream, frame)];
                }
            }
        }
        vec![Action::forward(direction, frame)]
    }
}

impl ResettableInterceptor for DisconnectWithFailedResumeInterceptor {
    fn reset(&self) {
        self.triggered.store(false, Ordering::SeqCst);
    }
}

/// Forces the first connection's resume to fail by stripping `resume` once,
/// then NACKs the client's presence re-entry so the SDK is forced to retry
/// (spec.md §4.3 `ReenterOnResumeFailed`; spec.md §9 leaves the exact
/// definition of "re-enter" open - see DESIGN.md for the reading used here).
pub struct ReenterOnResumeFailedInterceptor {
    resume_force_spent: AtomicBool,
}

impl ReenterOnResumeFailedInterceptor {
    pub fn new() -> Self {
        Self {
            resume_force_spent: AtomicBool::new(false),
        }
    }
}

impl Interceptor for ReenterOnResumeFailedInterceptor {
    fn intercept_connection(&self, params: ConnectionParams) -> ConnectionParams {
        if params.has_resume() && !self.resume_force_spent.swap(true, Ordering::SeqCst) {
            params.without_resume()
        } else {
            params
        }
    }

    fn intercept_frame(&self, direction: Direction, frame: Frame) -> Vec<Action> {
        if direction == Direction::Upstream {
            if let Some((action, message)) = wire::decode(&frame.payload) {
                if is_presence_enter(action, &message) {
                    let nack = wire::fabricate_nack(&message, DEFAULT_NONFATAL_NACK_CODE);
                    return vec![Action::forward(Direction::Downstream, Frame::binary(nack))];
                }
            }
        }
        vec![Action::forward(direction, frame)]
    }
}

impl ResettableInterceptor for ReenterOnResumeFailedInterceptor {
    fn reset(&self) {
        self.resume_force_spent.store(false, Ordering::SeqCst);
    }
}

/// Generic `FaultSimulation` for every WebSocket fault that acts purely by
/// installing an interceptor - i.e. everything except `DisconnectAndSuspend`.
pub struct InterceptorFault<I: ResettableInterceptor + 'static> {
    terminator: Arc<WsTerminator>,
    interceptor: Arc<I>,
    fault_type: FaultType,
}

impl<I: ResettableInterceptor + 'static> InterceptorFault<I> {
    pub fn new(terminator: Arc<WsTerminator>, interceptor: I, fault_type: FaultType) -> Self {
        Self {
            terminator,
            interceptor: Arc::new(interceptor),
            fault_type,
        }
    }
}

#[async_trait]
impl<I: ResettableInterceptor + 'static> FaultSimulation for InterceptorFault<I> {
    fn fault_type(&self) -> FaultType {
        self.fault_type
    }

    fn listen_port(&self) -> u16 {
        self.terminator.listen_port()
    }

    async fn start(&self) -> std::io::Result<()> {
        self.terminator.start().await
    }

    async fn enable(&self) {
        self.interceptor.reset();
        self.terminator.set_interceptor(self.interceptor.clone());
    }

    async fn resolve(&self) {
        self.terminator.clear_interceptor();
    }

    async fn clean_up(&self) {
        self.terminator.clear_interceptor();
        self.terminator.stop().await;
    }
}

/// How long `DisconnectAndSuspend` keeps rejecting new upgrades before
/// self-healing. spec.md §4.3 leaves the exact window ("a fixed interval")
/// unspecified; see DESIGN.md for the chosen default.
const SUSPENSION_WINDOW: Duration = Duration::from_secs(5);

/// Closes every currently-open client-side WebSocket, then rejects new
/// upgrades for a fixed window (spec.md §4.3 `DisconnectAndSuspend`, the
/// catalog's only `Fatal` fault).
pub struct DisconnectAndSuspend {
    terminator: Arc<WsTerminator>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl DisconnectAndSuspend {
    pub fn new(terminator: Arc<WsTerminator>) -> Self {
        Self {
            terminator,
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
impl FaultSimulation for DisconnectAndSuspend {
    fn fault_type(&self) -> FaultType {
        FaultType::Fatal
    }

    fn listen_port(&self) -> u16 {
        self.terminator.listen_port()
    }

    async fn start(&self) -> std::io::Result<()> {
        self.terminator.start().await
    }

    async fn enable(&self) {
        self.cancel_timer().await;
        self.terminator.close_all_connections().await;
        self.terminator.set_accepting(false);
        let accepting = self.terminator.accepting_flag();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(SUSPENSION_WINDOW).await;
            accepting.store(true, Ordering::Relaxed);
        });
        *self.timer.lock().await = Some(handle);
    }

    async fn resolve(&self) {
        self.cancel_timer().await;
        self.terminator.set_accepting(true);
    }

    async fn clean_up(&self) {
        self.cancel_timer().await;
        self.terminator.set_accepting(true);
        self.terminator.stop().await;
    }
}

pub fn null_application_layer_fault(terminator: Arc<WsTerminator>) -> InterceptorFault<PassThroughInterceptor> {
    InterceptorFault::new(terminator, PassThroughInterceptor, FaultType::Nonfatal)
}

pub fn attach_unresponsive(terminator: Arc<WsTerminator>) -> InterceptorFault<SwallowingInterceptor> {
    InterceptorFault::new(terminator, SwallowingInterceptor::new(is_attach), FaultType::Nonfatal)
}

pub fn detach_unresponsive(terminator: Arc<WsTerminator>) -> InterceptorFault<SwallowingInterceptor> {
    InterceptorFault::new(terminator, SwallowingInterceptor::new(is_detach), FaultType::Nonfatal)
}

pub fn enter_unresponsive(terminator: Arc<WsTerminator>) -> InterceptorFault<SwallowingInterceptor> {
    InterceptorFault::new(
        terminator,
        SwallowingInterceptor::new(is_presence_enter),
        FaultType::Nonfatal,
    )
}

pub fn enter_failed_with_nonfatal_nack(terminator: Arc<WsTerminator>) -> InterceptorFault<NackingInterceptor> {
    InterceptorFault::new(
        terminator,
        NackingInterceptor::new(is_presence_enter, DEFAULT_NONFATAL_NACK_CODE),
        FaultType::Nonfatal,
    )
}

pub fn update_failed_with_nonfatal_nack(terminator: Arc<WsTerminator>) -> InterceptorFault<NackingInterceptor> {
    InterceptorFault::new(
        terminator,
        NackingInterceptor::new(is_presence_update, DEFAULT_NONFATAL_NACK_CODE),
        FaultType::Nonfatal,
    )
}

pub fn disconnect_with_failed_resume(
    terminator: Arc<WsTerminator>,
) -> InterceptorFault<DisconnectWithFailedResumeInterceptor> {
    InterceptorFault::new(
        terminator,
        DisconnectWithFailedResumeInterceptor::new(),
        FaultType::NonfatalWithResume,
    )
}

pub fn reenter_on_resume_failed(
    terminator: Arc<WsTerminator>,
) -> InterceptorFault<ReenterOnResumeFailedInterceptor> {
    InterceptorFault::new(
        terminator,
        ReenterOnResumeFailedInterceptor::new(),
        FaultType::NonfatalWithResume,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ProtocolMessage;

    #[test]
    fn swallowing_interceptor_drops_matching_upstream_frames_only() {
        let interceptor = SwallowingInterceptor::new(is_attach);
        let attach = wire::encode(ProtocolAction::Attach, &ProtocolMessage::default());
        let actions = interceptor.intercept_frame(Direction::Upstream, Frame::binary(attach.clone()));
        assert!(actions.is_empty());

        let actions = interceptor.intercept_frame(Direction::Downstream, Frame::binary(attach));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn swallowing_interceptor_passes_through_non_matching_actions() {
        let interceptor = SwallowingInterceptor::new(is_attach);
        let heartbeat = wire::encode(ProtocolAction::Heartbeat, &ProtocolMessage::default());
        let actions = interceptor.intercept_frame(Direction::Upstream, Frame::binary(heartbeat));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn nacking_interceptor_fabricates_nack_towards_client() {
        let interceptor = NackingInterceptor::new(is_presence_enter, DEFAULT_NONFATAL_NACK_CODE);
        let enter = wire::encode(
            ProtocolAction::Presence,
            &ProtocolMessage {
                presence_action: Some(PresenceAction::Enter),
                channel: Some("chat".into()),
                ..Default::default()
            },
        );
        let actions = interceptor.intercept_frame(Direction::Upstream, Frame::binary(enter));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].direction, Direction::Downstream);
        let (action, message) = wire::decode(&actions[0].frame.payload).unwrap();
        assert_eq!(action, ProtocolAction::Nack);
        assert_eq!(message.error_code, Some(DEFAULT_NONFATAL_NACK_CODE));
    }

    #[test]
    fn disconnect_with_failed_resume_triggers_once_on_first_connected() {
        let interceptor = DisconnectWithFailedResumeInterceptor::new();
        let connected = wire::encode(ProtocolAction::Connected, &ProtocolMessage::default());

        let first = interceptor.intercept_frame(Direction::Downstream, Frame::binary(connected.clone()));
        assert!(first[0].send_and_close);

        let second = interceptor.intercept_frame(Direction::Downstream, Frame::binary(connected));
        assert!(!second[0].send_and_close);
    }

    #[test]
    fn disconnect_with_failed_resume_strips_resume_param() {
        let interceptor = DisconnectWithFailedResumeInterceptor::new();
        let params = ConnectionParams::from_query_string("clientId=abc&resume=token");
        let rewritten = interceptor.intercept_connection(params);
        assert!(!rewritten.has_resume());
    }
}
