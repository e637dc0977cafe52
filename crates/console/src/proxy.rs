// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy console relay (C6, §4.6): the remote-owner substitute for
//! [`ConsoleHandler`](crate::handler::ConsoleHandler), reached whenever
//! `collective.manager` names a different collective member than this
//! process. Opens a TLS connection to that peer's console-proxy port,
//! performs the handshake described in §6, and relays frames
//! bidirectionally for exactly one attached session.
//!
//! Deliberately uncached by the registry (§4.7): each resolution through
//! a remote owner gets a fresh `ProxyConsole` scoped to the single
//! attaching session, since the peer's own `ConsoleHandler` already does
//! the multi-subscriber fan-out on its side of the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::warn;

use crate::collective::CollectiveMember;
use crate::error::ConsoleError;
use crate::handler::{AttachOutcome, ConnectState};
use crate::replay::ReplayStatus;
use crate::session::{SessionEvent, SessionId, Sink};

const PROXY_PORT: u16 = 13001;
/// The peer sends two opaque framed messages before the handshake
/// response proper; they are not interpreted by this relay (§6).
const HANDSHAKE_PREAMBLE_FRAMES: usize = 2;

fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[derive(Debug, Serialize)]
struct ProxyConsoleRequest<'a> {
    proxyconsole: ProxyConsoleRequestBody<'a>,
}

#[derive(Debug, Serialize)]
struct ProxyConsoleRequestBody<'a> {
    name: &'a str,
    user: &'a str,
    tenant: &'a str,
    node: &'a str,
    skipreplay: bool,
}

#[derive(Debug, Serialize)]
struct StopRequest {
    operation: &'static str,
}

/// `send_break`/`reopen` requests are serialised with the on-wire key
/// literally spelled `"operation:"`, trailing colon included — a quirk of
/// the peer's request dispatcher that this relay must reproduce exactly,
/// unlike `detach`'s correctly-spelled `"operation"` key above.
#[derive(Debug, Serialize)]
struct BreakOrReopenRequest {
    #[serde(rename = "operation:")]
    operation: &'static str,
}

/// Verifies the peer certificate by raw byte-for-byte equality against
/// the collective member's stored fingerprint (§6) instead of chain
/// validation — the fingerprint pins identity directly, the same way the
/// collective already pins addresses.
#[derive(Debug)]
struct FingerprintVerifier {
    fingerprint: Vec<u8>,
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.fingerprint.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General("collective member certificate fingerprint mismatch".into()))
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

enum OutgoingFrame {
    Bytes(Vec<u8>),
    Stop,
    Break,
    Reopen,
}

/// A relay to a node owned by a peer collective member (C6). Connects
/// lazily on [`attach`](Self::attach); `write`/`send_break`/`reopen`
/// before that point are silently dropped, the same way a handler drops
/// commands after it has started tearing down.
pub struct ProxyConsole {
    member: CollectiveMember,
    node: String,
    tenant: String,
    myname: String,
    outgoing: std::sync::Mutex<Option<mpsc::UnboundedSender<OutgoingFrame>>>,
    connected: AtomicBool,
}

impl ProxyConsole {
    pub fn new(member: CollectiveMember, node: impl Into<String>, tenant: impl Into<String>, myname: impl Into<String>) -> Self {
        Self {
            member,
            node: node.into(),
            tenant: tenant.into(),
            myname: myname.into(),
            outgoing: std::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub async fn attach(&self, _session_id: SessionId, username: impl Into<String>, sink: Sink, skip_replay: bool) -> AttachOutcome {
        let username = username.into();
        match self.dial(username, sink, skip_replay).await {
            Ok(tx) => {
                *self.outgoing.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
                self.connected.store(true, Ordering::SeqCst);
                AttachOutcome {
                    replay_bytes: Bytes::new(),
                    status: ReplayStatus { connectstate: ConnectState::Connecting.as_str().to_owned(), client_count: 1 },
                }
            }
            Err(err) => {
                warn!(node = %self.node, manager = %self.member.address, error = %err, "proxy console dial failed");
                AttachOutcome {
                    replay_bytes: Bytes::new(),
                    status: ReplayStatus { connectstate: ConnectState::Unconnected.as_str().to_owned(), client_count: 0 },
                }
            }
        }
    }

    async fn dial(&self, username: String, sink: Sink, skip_replay: bool) -> Result<mpsc::UnboundedSender<OutgoingFrame>, ConsoleError> {
        ensure_crypto_provider();

        let host = self.member.address.split(':').next().unwrap_or(&self.member.address).to_owned();
        let tcp = TcpStream::connect((host.as_str(), PROXY_PORT)).await.map_err(|_| ConsoleError::Unreachable)?;

        let verifier = Arc::new(FingerprintVerifier { fingerprint: self.member.fingerprint.clone() });
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.as_str()).map_err(|_| ConsoleError::Misconfigured)?.to_owned();
        let tls = connector.connect(server_name, tcp).await.map_err(|_| ConsoleError::Unreachable)?;

        let mut framed = Framed::new(tls, LengthDelimitedCodec::new());
        for _ in 0..HANDSHAKE_PREAMBLE_FRAMES {
            framed.next().await.ok_or(ConsoleError::Unreachable)?.map_err(|_| ConsoleError::Unreachable)?;
        }

        let request = ProxyConsoleRequest {
            proxyconsole: ProxyConsoleRequestBody {
                name: &self.myname,
                user: &username,
                tenant: &self.tenant,
                node: &self.node,
                skipreplay: skip_replay,
            },
        };
        let payload = serde_json::to_vec(&request).map_err(|_| ConsoleError::Unknown)?;
        framed.send(payload.into()).await.map_err(|_| ConsoleError::Unreachable)?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        tokio::spawn(relay(framed, sink, outgoing_rx));
        Ok(outgoing_tx)
    }

    pub async fn write(&self, data: Bytes) {
        self.send_frame(OutgoingFrame::Bytes(data.to_vec()));
    }

    pub async fn send_break(&self) {
        self.send_frame(OutgoingFrame::Break);
    }

    pub async fn reopen(&self) {
        self.send_frame(OutgoingFrame::Reopen);
    }

    pub async fn detach(&self) {
        self.send_frame(OutgoingFrame::Stop);
        self.connected.store(false, Ordering::SeqCst);
        *self.outgoing.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub async fn get_recent(&self) -> (Bytes, ReplayStatus) {
        let connectstate = if self.connected.load(Ordering::SeqCst) { ConnectState::Connected } else { ConnectState::Unconnected };
        (Bytes::new(), ReplayStatus { connectstate: connectstate.as_str().to_owned(), client_count: 1 })
    }

    fn send_frame(&self, frame: OutgoingFrame) {
        if let Some(tx) = self.outgoing.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = tx.send(frame);
        }
    }
}

async fn relay(
    mut framed: Framed<tokio_rustls::client::TlsStream<TcpStream>, LengthDelimitedCodec>,
    sink: Sink,
    mut outgoing_rx: mpsc::UnboundedReceiver<OutgoingFrame>,
) {
    loop {
        tokio::select! {
            incoming = framed.next() => {
                let Some(incoming) = incoming else {
                    let _ = sink.send(SessionEvent::Status { connectstate: ConnectState::Unconnected, error: Some(ConsoleError::Unreachable) });
                    return;
                };
                let Ok(frame) = incoming else {
                    let _ = sink.send(SessionEvent::Status { connectstate: ConnectState::Unconnected, error: Some(ConsoleError::Unreachable) });
                    return;
                };
                match serde_json::from_slice::<Value>(&frame) {
                    Ok(Value::Array(items)) => {
                        let bytes: Vec<u8> = items
                            .into_iter()
                            .filter_map(|v| v.as_u64())
                            .map(|n| n as u8)
                            .collect();
                        if sink.send(SessionEvent::Bytes(Bytes::from(bytes))).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "malformed proxy frame"),
                }
            }
            outgoing = outgoing_rx.recv() => {
                let Some(outgoing) = outgoing else { return };
                let is_stop = matches!(outgoing, OutgoingFrame::Stop);
                let encoded = match outgoing {
                    OutgoingFrame::Bytes(data) => serde_json::to_vec(&data),
                    OutgoingFrame::Stop => serde_json::to_vec(&StopRequest { operation: "stop" }),
                    OutgoingFrame::Break => serde_json::to_vec(&BreakOrReopenRequest { operation: "break" }),
                    OutgoingFrame::Reopen => serde_json::to_vec(&BreakOrReopenRequest { operation: "reopen" }),
                };
                let Ok(encoded) = encoded else { continue };
                if framed.send(encoded.into()).await.is_err() {
                    return;
                }
                if is_stop {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
