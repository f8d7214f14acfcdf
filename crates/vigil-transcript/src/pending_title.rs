//! Pending-Title Store (§4.H): holds a user-supplied session title until the
//! subprocess is quiescent enough for the title-append write to land safely.
//!
//! Title records must not be appended to a transcript while its subprocess
//! is mid-turn — the file would race with the subprocess's own writes (§4.H).
//! This store exists solely to bridge that gap; it is not session storage.

use std::collections::HashMap;

use parking_lot::Mutex;
use vigil_core::SessionId;

/// Process-wide (in practice: one per core runtime instance, §9 "Global
/// state") map from session id to a title awaiting flush.
#[derive(Default)]
pub struct PendingTitleStore {
    titles: Mutex<HashMap<SessionId, String>>,
}

impl PendingTitleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or overwrite) a pending title for `session_id`.
    pub fn set(&self, session_id: SessionId, title: String) {
        self.titles.lock().insert(session_id, title);
    }

    /// Remove and return the pending title for `session_id`, if any. Called
    /// only by the post-turn flush path (§4.H), which then appends the
    /// title-append record itself.
    pub fn take(&self, session_id: &SessionId) -> Option<String> {
        self.titles.lock().remove(session_id)
    }

    /// Whether a title is currently pending for `session_id`, without
    /// clearing it.
    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.titles.lock().contains_key(session_id)
    }
}
