//! `SessionRegistryActor` - singleton supervisor for session actors.
//!
//! The registry is the top-level actor:
//!
//! - Singleton per relay instance
//! - Maps session ids to running `SessionActor` instances
//! - Creates sessions lazily on first join (and eagerly for the REST
//!   allocation endpoint)
//! - Drops a session id when its actor reports it ended; late messages for
//!   a dropped id simply create a fresh, empty session
//! - Owns the root `CancellationToken` for graceful shutdown

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{
    RegistryMessage, RegistryStatus, SessionLink, SessionMessage, SessionStatus,
};
use super::session::{SessionActor, SessionActorHandle};
use crate::config::Config;
use crate::errors::RelayError;
use crate::observability::RelayMetrics;
use tokio::sync::oneshot;

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `SessionRegistryActor`.
///
/// This is the public interface for interacting with the registry. All
/// methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<RelayMetrics>,
}

impl SessionRegistryHandle {
    /// Create a new `SessionRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let metrics = RelayMetrics::new();

        let actor = SessionRegistryActor {
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            sessions: HashMap::new(),
            session_mailbox_capacity: config.session_mailbox_capacity,
            whiteboard_end_grace: Duration::from_secs(config.whiteboard_end_grace_seconds),
            metrics: Arc::clone(&metrics),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
        }
    }

    /// Shared relay counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Allocate a fresh session id, creating an empty session for it.
    pub async fn allocate_session(&self) -> Result<String, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::AllocateSession { respond_to: tx })
            .await
            .map_err(|_| RelayError::RegistryUnavailable)?;
        rx.await.map_err(|_| RelayError::RegistryUnavailable)?
    }

    /// Get a handle to a session's mailbox, creating the session if needed.
    pub async fn get_or_create_session(&self, session_id: String) -> Result<SessionLink, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetOrCreateSession {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RelayError::RegistryUnavailable)?;
        rx.await.map_err(|_| RelayError::RegistryUnavailable)?
    }

    /// Look up a session's status without creating it.
    pub async fn session_status(&self, session_id: String) -> Result<SessionStatus, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetSessionStatus {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RelayError::RegistryUnavailable)?;
        rx.await.map_err(|_| RelayError::RegistryUnavailable)
    }

    /// Registry-wide status.
    pub async fn status(&self) -> Result<RegistryStatus, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|_| RelayError::RegistryUnavailable)?;
        rx.await.map_err(|_| RelayError::RegistryUnavailable)
    }

    /// Cancel the registry and every session under it.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

/// A session actor under registry supervision.
struct ManagedSession {
    handle: SessionActorHandle,
}

struct SessionRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Given to each session actor so it can report its own end.
    self_sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    sessions: HashMap<String, ManagedSession>,
    session_mailbox_capacity: usize,
    whiteboard_end_grace: Duration,
    metrics: Arc<RelayMetrics>,
}

impl SessionRegistryActor {
    async fn run(mut self) {
        info!(target: "relay.actor.registry", "SessionRegistryActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.registry",
                        session_count = self.sessions.len(),
                        "SessionRegistryActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(target: "relay.actor.registry", "Registry mailbox closed");
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "relay.actor.registry", "SessionRegistryActor stopped");
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::AllocateSession { respond_to } => {
                let result = fresh_id(|id| self.sessions.contains_key(id));
                if let Ok(session_id) = &result {
                    let _ = self.create_session(session_id.clone());
                }
                let _ = respond_to.send(result);
            }
            RegistryMessage::GetOrCreateSession {
                session_id,
                respond_to,
            } => {
                let link = self.get_or_create(session_id);
                let _ = respond_to.send(Ok(link));
            }
            RegistryMessage::GetSessionStatus {
                session_id,
                respond_to,
            } => {
                self.session_status(session_id, respond_to);
            }
            RegistryMessage::SessionEnded { session_id } => {
                if let Some(managed) = self.sessions.remove(&session_id) {
                    managed.handle.task_handle.abort();
                    self.metrics.session_removed();
                    info!(
                        target: "relay.actor.registry",
                        session_id = %session_id,
                        session_count = self.sessions.len(),
                        "Session removed from registry"
                    );
                }
            }
            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    session_count: self.sessions.len(),
                });
            }
        }
    }

    fn get_or_create(&mut self, session_id: String) -> SessionLink {
        // A finished actor whose SessionEnded we have not seen yet counts
        // as gone; replace it rather than hand out a dead mailbox.
        let stale = self
            .sessions
            .get(&session_id)
            .is_some_and(|managed| managed.handle.task_handle.is_finished());
        if stale {
            warn!(
                target: "relay.actor.registry",
                session_id = %session_id,
                "Replacing finished session actor"
            );
            self.sessions.remove(&session_id);
            self.metrics.session_removed();
        }

        if let Some(managed) = self.sessions.get(&session_id) {
            return SessionLink {
                sender: managed.handle.sender.clone(),
            };
        }
        SessionLink {
            sender: self.create_session(session_id),
        }
    }

    fn create_session(&mut self, session_id: String) -> mpsc::Sender<SessionMessage> {
        let handle = SessionActor::spawn(
            session_id.clone(),
            self.self_sender.clone(),
            self.session_mailbox_capacity,
            self.whiteboard_end_grace,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );
        self.metrics.session_created();
        info!(
            target: "relay.actor.registry",
            session_id = %session_id,
            session_count = self.sessions.len() + 1,
            "Session created"
        );
        let sender = handle.sender.clone();
        self.sessions.insert(session_id, ManagedSession { handle });
        sender
    }

    /// Answer a REST status probe without creating anything. The query is
    /// forwarded to the session actor from a spawned task so the registry
    /// never blocks on a child.
    fn session_status(&self, session_id: String, respond_to: oneshot::Sender<SessionStatus>) {
        let Some(managed) = self.sessions.get(&session_id) else {
            let _ = respond_to.send(SessionStatus {
                exists: false,
                participant_count: 0,
            });
            return;
        };

        let sender = managed.handle.sender.clone();
        tokio::spawn(async move {
            let (tx, rx) = oneshot::channel();
            if sender
                .send(SessionMessage::GetState { respond_to: tx })
                .await
                .is_err()
            {
                let _ = respond_to.send(SessionStatus {
                    exists: false,
                    participant_count: 0,
                });
                return;
            }
            let status = match rx.await {
                Ok(snapshot) => SessionStatus {
                    exists: true,
                    participant_count: snapshot.participant_count,
                },
                Err(_) => SessionStatus {
                    exists: false,
                    participant_count: 0,
                },
            };
            let _ = respond_to.send(status);
        });
    }
}

/// Draw ids until one is not `taken`. Collisions are vanishingly rare in
/// the 36^9 id space, but handing out an id that already names a live
/// session would splice two sessions together.
fn fresh_id<F>(taken: F) -> Result<String, RelayError>
where
    F: Fn(&str) -> bool,
{
    loop {
        let id = crate::ids::generate_id()?;
        if !taken(&id) {
            return Ok(id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::{JoinOutcome, JoinRequest};
    use crate::protocol::{Role, ServerFrame};

    fn test_config() -> Config {
        Config::from_vars(&HashMap::new()).unwrap()
    }

    async fn join_session(
        registry: &SessionRegistryHandle,
        session_id: &str,
        connection_id: &str,
        role: Role,
        whiteboard_mode: bool,
    ) -> (JoinOutcome, mpsc::Receiver<ServerFrame>, CancellationToken) {
        let link = registry
            .get_or_create_session(session_id.to_string())
            .await
            .unwrap();
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        link.sender
            .send(SessionMessage::Join {
                request: JoinRequest {
                    connection_id: connection_id.to_string(),
                    user_id: None,
                    user_name: Some("Tester".to_string()),
                    role,
                    whiteboard_mode,
                    outbound: outbound_tx,
                    cancel: cancel.clone(),
                },
                respond_to: tx,
            })
            .await
            .unwrap();
        let outcome = rx.await.unwrap().unwrap();
        (outcome, outbound_rx, cancel)
    }

    #[test]
    fn fresh_id_retries_past_taken_ids() {
        let attempts = std::cell::Cell::new(0u32);
        let id = fresh_id(|_| {
            let n = attempts.get() + 1;
            attempts.set(n);
            n <= 3
        })
        .unwrap();
        assert_eq!(id.len(), 9);
        assert_eq!(attempts.get(), 4);
    }

    #[tokio::test]
    async fn allocate_creates_an_empty_session() {
        let registry = SessionRegistryHandle::new(&test_config());

        let session_id = registry.allocate_session().await.unwrap();
        assert_eq!(session_id.len(), 9);

        let status = registry.session_status(session_id.clone()).await.unwrap();
        assert!(status.exists);
        assert_eq!(status.participant_count, 0);

        assert_eq!(registry.status().await.unwrap().session_count, 1);
        registry.shutdown();
    }

    #[tokio::test]
    async fn unknown_session_reports_not_existing() {
        let registry = SessionRegistryHandle::new(&test_config());

        let status = registry.session_status("missing12".to_string()).await.unwrap();
        assert!(!status.exists);
        assert_eq!(status.participant_count, 0);
        registry.shutdown();
    }

    #[tokio::test]
    async fn sessions_are_created_lazily_and_shared() {
        let registry = SessionRegistryHandle::new(&test_config());

        let (_, mut host_rx, _cancel) =
            join_session(&registry, "shared123", "c1", Role::Host, false).await;
        assert!(matches!(
            host_rx.recv().await,
            Some(ServerFrame::SessionState { .. })
        ));

        // Second join lands in the same session.
        let (_, mut rx2, _cancel2) =
            join_session(&registry, "shared123", "c2", Role::Participant, true).await;
        match rx2.recv().await {
            Some(ServerFrame::SessionState {
                participant_count, ..
            }) => assert_eq!(participant_count, 2),
            other => panic!("unexpected frame: {other:?}"),
        }

        let status = registry.session_status("shared123".to_string()).await.unwrap();
        assert!(status.exists);
        assert_eq!(status.participant_count, 2);
        assert_eq!(registry.status().await.unwrap().session_count, 1);
        registry.shutdown();
    }

    #[tokio::test]
    async fn ended_session_is_dropped_from_registry() {
        let registry = SessionRegistryHandle::new(&test_config());

        let (_, mut host_rx, _cancel) =
            join_session(&registry, "doomed123", "c1", Role::Host, false).await;
        host_rx.recv().await; // session-state

        let link = registry
            .get_or_create_session("doomed123".to_string())
            .await
            .unwrap();
        link.sender
            .send(SessionMessage::ClientFrame {
                connection_id: "c1".to_string(),
                frame: crate::protocol::ClientFrame::EndMeeting,
            })
            .await
            .unwrap();

        // Wait for the meeting-ended frame, then for the registry to drop
        // the id.
        assert!(matches!(
            host_rx.recv().await,
            Some(ServerFrame::MeetingEnded { .. })
        ));
        let mut dropped = false;
        for _ in 0..50 {
            if registry.status().await.unwrap().session_count == 0 {
                dropped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped, "registry still holds the ended session");

        let status = registry.session_status("doomed123".to_string()).await.unwrap();
        assert!(!status.exists);
        registry.shutdown();
    }
}
