// Copyright (C) 2024 Fault Proxy Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Layer-4 (raw TCP) proxy (spec.md §4.1, C1). Forwards a TLS byte stream
//! verbatim between the client and the upstream service, rewriting only the
//! HTTP `Host` header during the WebSocket upgrade, and exposing knobs to
//! freeze or drop forwarding.
//!
//! The client connects in cleartext on loopback (spec.md §1 Non-goals); the
//! proxy itself dials the upstream over TLS, mirroring the teacher's
//! downstream/upstream split in `noise-proxy::NoiseProxyConnection`, minus
//! the noise handshake (there's no crypto handshake at this layer - the
//! bytes are forwarded as-is).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, trace, warn};

use crate::metrics::TunnelMetrics;
use crate::proxy::RealtimeProxy;

const BUFFER_SIZE: usize = 4096;

pub struct TcpTunnel {
    listen_host: String,
    listen_port: u16,
    target_host: String,
    target_port: u16,
    is_forwarding: Arc<AtomicBool>,
    metrics: Arc<TunnelMetrics>,
    tls_connector: TlsConnector,
    listener_shutdown: Mutex<Option<watch::Sender<()>>>,
    connections: Arc<Mutex<Vec<watch::Sender<()>>>>,
}

impl TcpTunnel {
    pub fn new(listen_host: String, listen_port: u16, target_host: String, target_port: u16) -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let client_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            listen_host,
            listen_port,
            target_host,
            target_port,
            is_forwarding: Arc::new(AtomicBool::new(true)),
            metrics: Arc::new(TunnelMetrics::default()),
            tls_connector: TlsConnector::from(Arc::new(client_config)),
            listener_shutdown: Mutex::new(None),
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the forwarding gate (spec.md §4.1 step 5, §9: "a
    /// plain atomic boolean is sufficient"). Fault code flips this directly;
    /// readers may observe a one-chunk-stale value, which is acceptable.
    pub fn forwarding_flag(&self) -> Arc<AtomicBool> {
        self.is_forwarding.clone()
    }

    pub fn set_forwarding(&self, forwarding: bool) {
        self.is_forwarding.store(forwarding, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> Arc<TunnelMetrics> {
        self.metrics.clone()
    }

    async fn accept_loop(
        listener: TcpListener,
        mut shutdown: watch::Receiver<()>,
        target_host: String,
        target_port: u16,
        is_forwarding: Arc<AtomicBool>,
        metrics: Arc<TunnelMetrics>,
        connections: Arc<Mutex<Vec<watch::Sender<()>>>>,
        tls_connector: TlsConnector,
    ) {
        info!("TcpTunnel: listening, forwarding to {}:{}", target_host, target_port);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((client_stream, peer_addr)) => {
                            metrics.account_successful_tcp_open();
                            debug!("TcpTunnel: accepted connection from {}", peer_addr);
                            let (conn_tx, conn_rx) = watch::channel(());
                            connections.lock().expect("connections lock poisoned").push(conn_tx);
                            tokio::spawn(Self::handle_connection(
                                client_stream,
                                target_host.clone(),
                                target_port,
                                is_forwarding.clone(),
                                metrics.clone(),
                                conn_rx,
                                tls_connector.clone(),
                            ));
                        }
                        Err(e) => {
                            metrics.account_failed_tcp_open();
                            warn!("TcpTunnel: accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("TcpTunnel: terminating acceptor");
                    break;
                }
            }
        }
    }

    async fn handle_connection(
        client_stream: TcpStream,
        target_host: String,
        target_port: u16,
        is_forwarding: Arc<AtomicBool>,
        metrics: Arc<TunnelMetrics>,
        conn_shutdown: watch::Receiver<()>,
        tls_connector: TlsConnector,
    ) {
        let server_name = match ServerName::try_from(target_host.clone()) {
            Ok(name) => name,
            Err(e) => {
                warn!("TcpTunnel: invalid target host {}: {}", target_host, e);
                metrics.account_tcp_close_due_error();
                return;
            }
        };

        let upstream_tcp = match TcpStream::connect((target_host.as_str(), target_port)).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("TcpTunnel: failed to connect upstream {}:{}: {}", target_host, target_port, e);
                metrics.account_tcp_close_due_error();
                return;
            }
        };

        let upstream_tls = match tls_connector.connect(server_name, upstream_tcp).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("TcpTunnel: TLS handshake with upstream failed: {}", e);
                metrics.account_tcp_close_due_error();
                return;
            }
        };

        let (client_rd, client_wr) = tokio::io::split(client_stream);
        let (upstream_rd, upstream_wr) = tokio::io::split(upstream_tls);

        let down_to_up = Self::forward(
            client_rd,
            upstream_wr,
            is_forwarding.clone(),
            Some(target_host.clone()),
            metrics.clone(),
            conn_shutdown.clone(),
        );
        let up_to_down = Self::forward(
            upstream_rd,
            client_wr,
            is_forwarding,
            None,
            metrics.clone(),
            conn_shutdown,
        );

        tokio::join!(down_to_up, up_to_down);
        metrics.account_normal_tcp_close();
    }

    /// Pumps bytes from `reader` to `writer` in 4 KiB chunks (spec.md §4.1
    /// step 3). `rewrite_host`, when set, is the target host to substitute
    /// into the first buffer's `Host:` header - used only for the
    /// client-to-upstream direction.
    async fn forward<R, W>(
        mut reader: R,
        mut writer: W,
        is_forwarding: Arc<AtomicBool>,
        mut rewrite_host: Option<String>,
        metrics: Arc<TunnelMetrics>,
        mut shutdown: watch::Receiver<()>,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let mut first_read = true;
        loop {
            let n = tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        trace!("TcpTunnel: read error, closing: {}", e);
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            };

            let mut chunk = buf[..n].to_vec();
            if first_read {
                first_read = false;
                if let Some(target_host) = rewrite_host.take() {
                    chunk = rewrite_host_header(&chunk, &target_host);
                }
            }

            if !is_forwarding.load(Ordering::Relaxed) {
                metrics.account_bytes_gated(n as u64);
                continue;
            }

            if let Err(e) = writer.write_all(&chunk).await {
                trace!("TcpTunnel: write error, closing: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    }
}

#[async_trait]
impl RealtimeProxy for TcpTunnel {
    async fn start(&self) -> std::io::Result<()> {
        let mut guard = self.listener_shutdown.lock().expect("listener lock poisoned");
        if guard.is_some() {
            // spec.md §4.1: "Calling start twice is a no-op."
            return Ok(());
        }
        let listener = TcpListener::bind((self.listen_host.as_str(), self.listen_port)).await?;
        let (tx, rx) = watch::channel(());
        *guard = Some(tx);
        drop(guard);

        tokio::spawn(Self::accept_loop(
            listener,
            rx,
            self.target_host.clone(),
            self.target_port,
            self.is_forwarding.clone(),
            self.metrics.clone(),
            self.connections.clone(),
            self.tls_connector.clone(),
        ));
        Ok(())
    }

    async fn stop(&self) {
        let tx = self
            .listener_shutdown
            .lock()
            .expect("listener lock poisoned")
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        let conns = std::mem::take(&mut *self.connections.lock().expect("connections lock poisoned"));
        for conn_tx in conns {
            let _ = conn_tx.send(());
        }
    }

    fn listen_host(&self) -> String {
        self.listen_host.clone()
    }

    fn listen_port(&self) -> u16 {
        self.listen_port
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Substitutes the first `Host: ...\r\n` header with `Host: <target_host>\r\n`
/// (spec.md §4.1 step 4, §8 "Host rewrite correctness"). Bytes outside the
/// header value are left untouched. If no `Host:` header is found in this
/// buffer, the buffer is forwarded unchanged.
fn rewrite_host_header(data: &[u8], target_host: &str) -> Vec<u8> {
    const NEEDLE: &[u8] = b"\r\nHost: ";
    let Some(needle_start) = find_subsequence(data, NEEDLE) else {
        return data.to_vec();
    };
    let header_value_start = needle_start + NEEDLE.len();
    let Some(relative_end) = find_subsequence(&data[header_value_start..], b"\r\n") else {
        return data.to_vec();
    };
    let header_end = header_value_start + relative_end + 2;

    let mut out = Vec::with_capacity(data.len() + target_host.len());
    out.extend_from_slice(&data[..header_value_start]);
    out.extend_from_slice(target_host.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&data[header_end..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_host_header_leaving_rest_of_request_untouched() {
        let request = b"GET / HTTP/1.1\r\nHost: 127.0.0.1:13579\r\nUpgrade: websocket\r\n\r\n";
        let rewritten = rewrite_host_header(request, "realtime.ably.io");
        let rewritten = String::from_utf8(rewritten).unwrap();
        assert_eq!(
            rewritten,
            "GET / HTTP/1.1\r\nHost: realtime.ably.io\r\nUpgrade: websocket\r\n\r\n"
        );
    }

    #[test]
    fn leaves_request_unchanged_when_no_host_header_present() {
        let request = b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        let rewritten = rewrite_host_header(request, "realtime.ably.io");
        assert_eq!(rewritten, request);
    }

    #[test]
    fn tunnel_starts_not_forwarding_by_default_is_true() {
        let tunnel = TcpTunnel::new("127.0.0.1".into(), 0, "example.invalid".into(), 443);
        assert!(tunnel.forwarding_flag().load(Ordering::Relaxed));
    }
}
