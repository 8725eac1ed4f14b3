//! Thread → opencode session registry.
//!
//! Each thread is bound to at most one remote session, created on demand the
//! first time the thread is activated and kept for the life of the process.

use crate::message::ThreadChannel;
use crate::opencode::{OpencodeClient, OpencodeError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Map a channel name to a project directory.
///
/// `project-backend` becomes `/project/backend`; one leading `#` is dropped.
pub fn channel_to_directory(channel_name: &str) -> String {
    let name = channel_name.strip_prefix('#').unwrap_or(channel_name);
    format!("/{}", name.replace('-', "/"))
}

/// A thread's binding to a remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub directory: String,
    pub active: bool,
}

/// Outcome of `SessionRegistry::activate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub session: Session,
    /// True only for the caller whose request created the remote session
    pub created: bool,
}

/// Session activation error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Thread {thread_id} has no parent channel")]
    NoParent { thread_id: String },

    #[error("Failed to create session for {directory}: {source}")]
    Remote {
        directory: String,
        #[source]
        source: OpencodeError,
    },
}

/// In-memory registry of thread sessions.
pub struct SessionRegistry {
    client: Arc<OpencodeClient>,
    sessions: DashMap<String, Session>,
    /// Per-thread activation locks, so concurrent first messages share one creation
    activation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    /// Create an empty registry backed by `client`.
    pub fn new(client: Arc<OpencodeClient>) -> Self {
        Self {
            client,
            sessions: DashMap::new(),
            activation_locks: DashMap::new(),
        }
    }

    /// Look up the session bound to a thread.
    pub fn get(&self, thread_id: &str) -> Option<Session> {
        self.sessions.get(thread_id).map(|s| s.value().clone())
    }

    /// Number of activated threads.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Return the thread's session, creating one remotely if needed.
    pub async fn get_or_create(&self, thread: &ThreadChannel) -> Result<Session, SessionError> {
        self.activate(thread).await.map(|a| a.session)
    }

    /// Like `get_or_create`, but also reports whether this call did the creating.
    ///
    /// Concurrent callers for the same thread share one creation; exactly one
    /// of them sees `created == true`.
    pub async fn activate(&self, thread: &ThreadChannel) -> Result<Activation, SessionError> {
        if let Some(session) = self.get(&thread.id) {
            return Ok(Activation {
                session,
                created: false,
            });
        }

        let lock = self
            .activation_locks
            .entry(thread.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        // Another caller may have finished activation while we waited.
        if let Some(session) = self.get(&thread.id) {
            return Ok(Activation {
                session,
                created: false,
            });
        }

        let result = self.create(thread).await;

        drop(guard);
        self.activation_locks
            .remove_if(&thread.id, |_, l| Arc::strong_count(l) <= 2);

        result.map(|session| Activation {
            session,
            created: true,
        })
    }

    async fn create(&self, thread: &ThreadChannel) -> Result<Session, SessionError> {
        let Some(parent) = thread.parent.as_ref() else {
            tracing::warn!(thread_id = %thread.id, "Thread has no parent channel");
            return Err(SessionError::NoParent {
                thread_id: thread.id.clone(),
            });
        };

        let directory = channel_to_directory(&parent.name);

        match self.client.create_session(&thread.name, &directory).await {
            Ok(info) => {
                let session = Session {
                    session_id: info.id,
                    directory,
                    active: true,
                };
                self.sessions.insert(thread.id.clone(), session.clone());

                tracing::info!(
                    session_id = %session.session_id,
                    thread_id = %thread.id,
                    directory = %session.directory,
                    "Created opencode session"
                );
                Ok(session)
            }
            Err(e) => {
                tracing::error!(
                    thread_id = %thread.id,
                    directory = %directory,
                    status = ?e.status(),
                    error = %e,
                    "Failed to create opencode session"
                );
                Err(SessionError::Remote {
                    directory,
                    source: e,
                })
            }
        }
    }
}
