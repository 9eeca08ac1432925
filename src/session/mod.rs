//! In-memory conversation state.
//!
//! Each session id owns a slot holding its [`Session`] behind a short-lived mutex and a separate
//! turn gate. A whole chat or upload turn holds the gate ([`SessionStore::begin_turn`]) so turns
//! for one id run in arrival order, while the state mutex is only taken to snapshot or mutate.
//! The outer map lock is held just long enough to look up, insert or remove a slot.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::types::{DocumentContext, Mode, Turn};

/// Conversation state for one session id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    /// Session id.
    pub id: String,
    /// Turns in arrival order.
    pub history: Vec<Turn>,
    /// Uploaded document, if any.
    pub document_context: Option<DocumentContext>,
    /// Mode chosen for the latest turn.
    pub mode: Mode,
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            history: Vec::new(),
            document_context: None,
            mode: Mode::GeneralQa,
        }
    }

    /// Whether a document is attached.
    pub fn has_document(&self) -> bool {
        self.document_context.is_some()
    }
}

/// Summary of the attached document returned with history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    /// Uploaded file name.
    pub filename: String,
    /// `simple_document` or `chunked_document`.
    pub kind: &'static str,
    /// Length of the document text in characters.
    pub characters: usize,
}

/// Session as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    /// Session id.
    pub session_id: String,
    /// Mode chosen for the latest turn.
    pub mode: Mode,
    /// Attached document, if any.
    pub document: Option<DocumentInfo>,
    /// Turns in arrival order.
    pub history: Vec<Turn>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        let document = session.document_context.as_ref().map(|context| DocumentInfo {
            filename: context.filename().to_string(),
            kind: match context {
                DocumentContext::SimpleDocument { .. } => "simple_document",
                DocumentContext::ChunkedDocument { .. } => "chunked_document",
            },
            characters: context.full_text().chars().count(),
        });
        Self {
            session_id: session.id,
            mode: session.mode,
            document,
            history: session.history,
        }
    }
}

struct SessionSlot {
    state: Mutex<Session>,
    gate: Arc<Mutex<()>>,
}

impl SessionSlot {
    fn new(id: &str) -> Self {
        Self {
            state: Mutex::new(Session::new(id)),
            gate: Arc::new(Mutex::new(())),
        }
    }
}

/// Held for the duration of one turn; turns for the same session queue behind it.
#[must_use = "the turn gate is released when the guard is dropped"]
pub struct TurnGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Owner of every session.
pub struct SessionStore {
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
    max_turns: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(50)
    }
}

impl SessionStore {
    /// Store keeping at most `max_turns` turns per session.
    pub fn new(max_turns: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    async fn slot(&self, id: &str) -> Arc<SessionSlot> {
        if let Some(slot) = self.slots.read().await.get(id) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id = id, "Created session");
                Arc::new(SessionSlot::new(id))
            })
            .clone()
    }

    /// Wait for earlier turns of `id` to finish and hold its gate.
    pub async fn begin_turn(&self, id: &str) -> TurnGuard {
        let gate = self.slot(id).await.gate.clone();
        TurnGuard {
            _guard: gate.lock_owned().await,
        }
    }

    /// Snapshot of `id`, created empty on first use.
    pub async fn get_or_create(&self, id: &str) -> Session {
        self.slot(id).await.state.lock().await.clone()
    }

    /// Snapshot of `id` if it exists.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let slot = self.slots.read().await.get(id).cloned()?;
        let session = slot.state.lock().await.clone();
        Some(session)
    }

    /// Append a turn, dropping the oldest beyond the retention limit.
    pub async fn append_turn(&self, id: &str, turn: Turn) {
        let slot = self.slot(id).await;
        let mut session = slot.state.lock().await;
        session.history.push(turn);
        let excess = session.history.len().saturating_sub(self.max_turns);
        if excess > 0 {
            session.history.drain(..excess);
        }
    }

    /// Attach `context`, replacing any previous document.
    pub async fn set_document_context(&self, id: &str, context: DocumentContext) {
        let slot = self.slot(id).await;
        let mut session = slot.state.lock().await;
        if let Some(previous) = &session.document_context {
            tracing::info!(
                session_id = id,
                previous = previous.filename(),
                next = context.filename(),
                "Replacing session document"
            );
        }
        session.document_context = Some(context);
    }

    /// Record the mode of the current turn.
    pub async fn set_mode(&self, id: &str, mode: Mode) {
        let slot = self.slot(id).await;
        slot.state.lock().await.mode = mode;
    }

    /// Drop `id` once any in-flight turn has finished. Returns whether it existed.
    pub async fn clear(&self, id: &str) -> bool {
        let existing = self.slots.read().await.get(id).cloned();
        let Some(slot) = existing else {
            return false;
        };
        let _turn = slot.gate.clone().lock_owned().await;
        let removed = self.slots.write().await.remove(id).is_some();
        tracing::info!(session_id = id, removed, "Cleared session");
        removed
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Whether no sessions exist.
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}
