// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Layer-7 WebSocket terminator (spec.md §4.2, C2). Unlike C1, this proxy
//! actually terminates the client's WebSocket connection (via `axum`) and
//! opens its own, independent WebSocket connection to upstream (via
//! `tokio_tungstenite`), so that frames can be inspected and rewritten in
//! flight by the active `Interceptor`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame as AxCloseFrame, Message as AxMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio_tungstenite::tungstenite::Message as TtMessage;
use tracing::{debug, info, warn};

use crate::frame::{Action, Direction, Frame};
use crate::interceptor::{Interceptor, PassThroughInterceptor};
use crate::params::ConnectionParams;
use crate::proxy::RealtimeProxy;

type ClientSink = SplitSink<WebSocket, AxMessage>;
type UpstreamSink = SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    TtMessage,
>;

/// The two halves of an in-flight connection that an `enable()` call may
/// need to act on immediately, not just on the next frame (spec.md §9:
/// `DisconnectAndSuspend` "closes the client-side WebSocket of every
/// connection open at the moment the fault is enabled").
struct ConnectionHandles {
    client: Arc<TokioMutex<ClientSink>>,
    shutdown: watch::Sender<()>,
}

/// State handed to the `axum` router. Kept separate from `WsTerminator`
/// itself (rather than wrapping the whole terminator in `Arc` for `State`)
/// so `start`/`stop` can stay `&self`, matching the `RealtimeProxy` trait's
/// other implementor.
#[derive(Clone)]
struct Shared {
    target_host: String,
    target_port: u16,
    interceptor: Arc<RwLock<Arc<dyn Interceptor>>>,
    accepting: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<ConnectionHandles>>>,
}

pub struct WsTerminator {
    listen_host: String,
    listen_port: u16,
    shared: Shared,
    server_shutdown: Mutex<Option<watch::Sender<()>>>,
}

impl WsTerminator {
    pub fn new(listen_host: String, listen_port: u16, target_host: String, target_port: u16) -> Self {
        Self {
            listen_host,
            listen_port,
            shared: Shared {
                target_host,
                target_port,
                interceptor: Arc::new(RwLock::new(Arc::new(PassThroughInterceptor))),
                accepting: Arc::new(AtomicBool::new(true)),
                connections: Arc::new(Mutex::new(Vec::new())),
            },
            server_shutdown: Mutex::new(None),
        }
    }

    /// Hot-swaps the active interceptor (spec.md §3: faults install an
    /// interceptor on `enable` and restore the pass-through one on
    /// `resolve`/`cleanUp`). Never held across an `.await`.
    pub fn set_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        *self.shared.interceptor.write().expect("interceptor lock poisoned") = interceptor;
    }

    pub fn clear_interceptor(&self) {
        self.set_interceptor(Arc::new(PassThroughInterceptor));
    }

    /// Shared handle to the accept gate (spec.md §4.3 `DisconnectAndSuspend`).
    pub fn accepting_flag(&self) -> Arc<AtomicBool> {
        self.shared.accepting.clone()
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.shared.accepting.store(accepting, Ordering::Relaxed);
    }

    /// Forcibly closes every client-side WebSocket currently open. Used by
    /// `DisconnectAndSuspend.enable()` so the effect is immediate rather than
    /// waiting for the next frame on each connection.
    pub async fn close_all_connections(&self) {
        Shared::close_all(&self.shared).await;
    }
}

impl Shared {
    async fn close_all(shared: &Shared) {
        let handles = std::mem::take(&mut *shared.connections.lock().expect("connections lock poisoned"));
        for handle in handles {
            let _ = handle.shutdown.send(());
            let mut sink = handle.client.lock().await;
            let _ = sink.send(AxMessage::Close(None)).await;
        }
    }

    async fn ws_handler(State(shared): State<Shared>, uri: Uri, ws: WebSocketUpgrade) -> axum::response::Response {
        if !shared.accepting.load(Ordering::Relaxed) {
            // spec.md §4.3 DisconnectAndSuspend: reject new connections outright.
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
        ws.on_upgrade(move |socket| Self::handle_socket(shared, uri, socket))
    }

    async fn handle_socket(shared: Shared, uri: Uri, socket: WebSocket) {
        let params = ConnectionParams::from_query_string(uri.query().unwrap_or(""));
        let interceptor = shared.interceptor.read().expect("interceptor lock poisoned").clone();
        let params = interceptor.intercept_connection(params);

        let path = uri.path();
        let query = params.to_query_string();
        let upstream_url = if query.is_empty() {
            format!("wss://{}:{}{}", shared.target_host, shared.target_port, path)
        } else {
            format!("wss://{}:{}{}?{}", shared.target_host, shared.target_port, path, query)
        };

        let upstream = match tokio_tungstenite::connect_async(&upstream_url).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!("WsTerminator: upstream handshake to {} failed: {}", upstream_url, e);
                let (mut client_sink, _) = socket.split();
                let _ = client_sink.send(AxMessage::Close(None)).await;
                return;
            }
        };

        debug!("WsTerminator: established upstream connection to {}", upstream_url);

        let (client_tx, client_rx) = socket.split();
        let (upstream_tx, upstream_rx) = upstream.split();

        let client_tx = Arc::new(TokioMutex::new(client_tx));
        let upstream_tx = Arc::new(TokioMutex::new(upstream_tx));

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        shared.connections.lock().expect("connections lock poisoned").push(ConnectionHandles {
            client: client_tx.clone(),
            shutdown: shutdown_tx,
        });

        let client_to_upstream = Self::pump_client_to_upstream(
            client_rx,
            upstream_tx.clone(),
            interceptor.clone(),
            client_tx.clone(),
            shutdown_rx.clone(),
        );
        let upstream_to_client =
            Self::pump_upstream_to_client(upstream_rx, client_tx, upstream_tx, interceptor, shutdown_rx);

        tokio::join!(client_to_upstream, upstream_to_client);
    }

    /// Applies the interceptor's returned `Action`s, routing each to whichever
    /// sink matches `action.direction` - not necessarily the caller's own
    /// destination, since an interceptor may redirect or fan a frame out to
    /// both directions (spec.md §4.2 step 4).
    async fn dispatch_actions(
        actions: Vec<Action>,
        client_tx: &Arc<TokioMutex<ClientSink>>,
        upstream_tx: &Arc<TokioMutex<UpstreamSink>>,
    ) {
        for action in actions {
            match action.direction {
                Direction::Downstream => {
                    let mut sink = client_tx.lock().await;
                    let _ = sink.send(action.frame.clone().into()).await;
                    if action.send_and_close {
                        let _ = sink.send(AxMessage::Close(None)).await;
                    }
                }
                Direction::Upstream => {
                    let mut sink = upstream_tx.lock().await;
                    let _ = sink.send(action.frame.clone().into()).await;
                    if action.send_and_close {
                        let _ = sink.send(TtMessage::Close(None)).await;
                    }
                }
            }
        }
    }

    async fn pump_client_to_upstream(
        mut client_rx: SplitStream<WebSocket>,
        upstream_tx: Arc<TokioMutex<UpstreamSink>>,
        interceptor: Arc<dyn Interceptor>,
        client_tx: Arc<TokioMutex<ClientSink>>,
        mut shutdown: watch::Receiver<()>,
    ) {
        loop {
            let msg = tokio::select! {
                msg = client_rx.next() => msg,
                _ = shutdown.changed() => break,
            };
            let Some(msg) = msg else { break };
            let Ok(msg) = msg else { break };
            let is_close = matches!(msg, AxMessage::Close(_));
            let frame = frame_from_ax_message(msg);
            let actions = interceptor.intercept_frame(Direction::Upstream, frame);
            Self::dispatch_actions(actions, &client_tx, &upstream_tx).await;
            if is_close {
                break;
            }
        }
        let _ = upstream_tx.lock().await.send(TtMessage::Close(None)).await;
    }

    async fn pump_upstream_to_client(
        mut upstream_rx: SplitStream<
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        >,
        client_tx: Arc<TokioMutex<ClientSink>>,
        upstream_tx: Arc<TokioMutex<UpstreamSink>>,
        interceptor: Arc<dyn Interceptor>,
        mut shutdown: watch::Receiver<()>,
    ) {
        loop {
            let msg = tokio::select! {
                msg = upstream_rx.next() => msg,
                _ = shutdown.changed() => break,
            };
            let Some(msg) = msg else { break };
            let Ok(msg) = msg else { break };
            let is_close = matches!(msg, TtMessage::Close(_));
            let frame: Frame = msg.into();
            let actions = interceptor.intercept_frame(Direction::Downstream, frame);
            Self::dispatch_actions(actions, &client_tx, &upstream_tx).await;
            if is_close {
                break;
            }
        }
        let _ = client_tx.lock().await.send(AxMessage::Close(None)).await;
    }
}

/// `axum::extract::ws::Message` and `tokio_tungstenite::tungstenite::Message`
/// share the same shape (`Text`/`Binary`/`Ping`/`Pong`/`Close`, with `Bytes`
/// payloads) but are distinct types, so `Frame`'s blanket conversions (in
/// `frame.rs`) only cover the tungstenite side. This free function and the
/// `From<Frame> for AxMessage` impl below cover the axum side.
fn frame_from_ax_message(msg: AxMessage) -> Frame {
    use crate::frame::Opcode;
    match msg {
        AxMessage::Text(t) => Frame {
            opcode: Opcode::Text,
            payload: bytes::Bytes::from(t),
            is_final: true,
        },
        AxMessage::Binary(b) => Frame {
            opcode: Opcode::Binary,
            payload: b,
            is_final: true,
        },
        AxMessage::Ping(b) => Frame {
            opcode: Opcode::Ping,
            payload: b,
            is_final: true,
        },
        AxMessage::Pong(b) => Frame {
            opcode: Opcode::Pong,
            payload: b,
            is_final: true,
        },
        AxMessage::Close(Some(close)) => Frame::close_with(close.code, &close.reason),
        AxMessage::Close(None) => Frame::close(),
    }
}

impl From<Frame> for AxMessage {
    fn from(frame: Frame) -> Self {
        use crate::frame::{decode_close_payload, Opcode};
        match frame.opcode {
            Opcode::Text => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                AxMessage::Text(text.into())
            }
            Opcode::Binary => AxMessage::Binary(frame.payload),
            Opcode::Ping => AxMessage::Ping(frame.payload),
            Opcode::Pong => AxMessage::Pong(frame.payload),
            Opcode::Close => match decode_close_payload(&frame.payload) {
                Some((code, reason)) => AxMessage::Close(Some(AxCloseFrame {
                    code,
                    reason: reason.into(),
                })),
                None => AxMessage::Close(None),
            },
        }
    }
}

#[async_trait]
impl RealtimeProxy for WsTerminator {
    async fn start(&self) -> std::io::Result<()> {
        let mut guard = self.server_shutdown.lock().expect("server lock poisoned");
        if guard.is_some() {
            // spec.md §4.1 (shared by §4.2): "Calling start twice is a no-op."
            return Ok(());
        }

        let listener = TcpListener::bind((self.listen_host.as_str(), self.listen_port)).await?;
        let (tx, mut rx) = watch::channel(());
        *guard = Some(tx);
        drop(guard);

        let router = Router::new()
            .fallback(any(Shared::ws_handler))
            .with_state(self.shared.clone());

        info!(
            "WsTerminator: listening, forwarding to {}:{}",
            self.shared.target_host, self.shared.target_port
        );
        tokio::spawn(async move {
            let _ = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = rx.changed().await;
                })
                .await;
        });
        Ok(())
    }

    async fn stop(&self) {
        let tx = self.server_shutdown.lock().expect("server lock poisoned").take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        self.close_all_connections().await;
    }

    fn listen_host(&self) -> String {
        self.listen_host.clone()
    }

    fn listen_port(&self) -> u16 {
        self.listen_port
    }
}
