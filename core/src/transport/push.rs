/// Push channel: line-delimited JSON events over TCP, scoped to one identity
///
/// The client sends its `SocketAuth` as the first line, then reads one
/// `PushEvent` per line. Whenever the identity changes the current
/// connection is dropped and a new one is opened with the new credentials,
/// so events for a previous identity never reach the store.
use crate::auth::SocketAuth;
use crate::error::Result;
use crate::messenger_types::PushEvent;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 256;

/// What the push task reports to its consumer
#[derive(Debug, Clone)]
pub enum PushUpdate {
    /// Connected and authenticated as `auth`
    Connected { auth: SocketAuth },
    Disconnected { reason: String },
    Event(PushEvent),
}

enum SessionEnd {
    /// Connection lost; retry after the back-off
    Lost(String),
    /// Credentials changed; reconnect immediately
    IdentityChanged,
    /// Handle or receiver dropped
    Stopped,
}

pub struct PushClient {
    addr: String,
    retry_interval: Duration,
}

/// Owner side of a running push task
pub struct PushHandle {
    auth_tx: watch::Sender<Option<SocketAuth>>,
    task: JoinHandle<()>,
}

impl PushHandle {
    /// Switch identity; the open connection is replaced
    pub fn set_auth(&self, auth: Option<SocketAuth>) {
        self.auth_tx.send_replace(auth);
    }

    /// Drop the connection and stay idle until a new identity is set
    pub fn disconnect(&self) {
        self.set_auth(None);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl PushClient {
    pub fn new(addr: impl Into<String>, retry_interval: Duration) -> Self {
        Self {
            addr: addr.into(),
            retry_interval,
        }
    }

    /// Start the connection task for `auth`
    pub fn spawn(self, auth: Option<SocketAuth>) -> (PushHandle, mpsc::Receiver<PushUpdate>) {
        let (auth_tx, auth_rx) = watch::channel(auth);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(async move { self.run(auth_rx, tx).await });
        (PushHandle { auth_tx, task }, rx)
    }

    async fn run(self, mut auth_rx: watch::Receiver<Option<SocketAuth>>, tx: mpsc::Sender<PushUpdate>) {
        loop {
            let current = auth_rx.borrow_and_update().clone();
            let Some(auth) = current else {
                // Idle until someone logs in
                if auth_rx.changed().await.is_err() {
                    return;
                }
                continue;
            };

            let (reason, back_off) = match self.session(&auth, &mut auth_rx, &tx).await {
                SessionEnd::Stopped => return,
                SessionEnd::IdentityChanged => ("identity changed".to_string(), false),
                SessionEnd::Lost(reason) => (reason, true),
            };
            debug!("Push connection ended: {}", reason);
            if tx
                .send(PushUpdate::Disconnected { reason })
                .await
                .is_err()
            {
                return;
            }
            if !back_off {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn session(
        &self,
        auth: &SocketAuth,
        auth_rx: &mut watch::Receiver<Option<SocketAuth>>,
        tx: &mpsc::Sender<PushUpdate>,
    ) -> SessionEnd {
        let stream = match self.connect(auth).await {
            Ok(stream) => stream,
            Err(e) => return SessionEnd::Lost(e.to_string()),
        };
        info!("Push channel connected to {}", self.addr);
        if tx
            .send(PushUpdate::Connected { auth: auth.clone() })
            .await
            .is_err()
        {
            return SessionEnd::Stopped;
        }

        let mut lines = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<PushEvent>(line) {
                            Ok(event) => {
                                if tx.send(PushUpdate::Event(event)).await.is_err() {
                                    return SessionEnd::Stopped;
                                }
                            }
                            Err(e) => debug!("Skipping unrecognised push line: {}", e),
                        }
                    }
                    Ok(None) => return SessionEnd::Lost("server closed the connection".to_string()),
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                },
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        return SessionEnd::Stopped;
                    }
                    return SessionEnd::IdentityChanged;
                }
            }
        }
    }

    async fn connect(&self, auth: &SocketAuth) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            warn!("Push connect to {} failed: {}", self.addr, e);
            e
        })?;
        let mut hello = serde_json::to_vec(auth)?;
        hello.push(b'\n');
        stream.write_all(&hello).await?;
        Ok(stream)
    }
}
