//! Bounded persistent session store
//!
//! Maps conversation id → latest [`AgentState`], backed by a single JSON
//! file. Three bounds keep the file from growing without limit:
//!
//! - at most [`MAX_SESSIONS`] conversations, least-recently-active evicted
//!   first (ranked by the timestamp of each entry's last history item)
//! - at most [`MAX_HISTORY_PER_SESSION`] history turns per conversation
//! - at most [`MAX_FILE_BYTES`] serialized bytes, enforced by further
//!   eviction and, as a last resort, by halving every remaining history
//!
//! Persistence is best-effort, not transactional: I/O failures are logged
//! and swallowed, and a failed save leaves the in-memory view ahead of the
//! on-disk one until the next successful save. The file itself is replaced
//! atomically (temp file + rename), so readers never observe a partial
//! write. Concurrent writers are not coordinated; the later whole-file
//! rewrite wins.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::state::AgentState;

/// Maximum number of conversations retained
pub const MAX_SESSIONS: usize = 20;

/// Maximum history turns retained per conversation
pub const MAX_HISTORY_PER_SESSION: usize = 50;

/// Maximum serialized file size in bytes (2 MiB)
pub const MAX_FILE_BYTES: usize = 2 * 1024 * 1024;

/// On-disk format version; bump when the layout changes
const FORMAT_VERSION: u32 = 1;

/// On-disk envelope, read side
///
/// `version` is mandatory: a file without one predates the versioned format
/// and is discarded rather than misread.
#[derive(Deserialize)]
struct SessionFile {
    version: u32,
    sessions: HashMap<String, AgentState>,
}

/// On-disk envelope, write side (borrows the live map)
#[derive(Serialize)]
struct SessionFileRef<'a> {
    version: u32,
    sessions: &'a HashMap<String, AgentState>,
}

/// File-backed conversation store
pub struct SessionStore {
    path: PathBuf,
    sessions: HashMap<String, AgentState>,
}

impl SessionStore {
    /// Open a store backed by the given file
    ///
    /// An absent, empty, unreadable, or unrecognized file yields an empty
    /// store; nothing here is fatal. Bounds are enforced (and the file
    /// rewritten) immediately when existing sessions were loaded.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sessions = load_sessions(&path);
        let had_sessions = !sessions.is_empty();

        let mut store = Self { path, sessions };
        if had_sessions {
            info!(count = store.sessions.len(), "loaded sessions");
            store.persist();
        }
        store
    }

    /// Return the session for `id`, creating and persisting a fresh one if
    /// none exists
    pub fn get_or_create(&mut self, id: &str) -> AgentState {
        if let Some(state) = self.sessions.get(id) {
            return state.clone();
        }

        debug!(conversation = %id, "creating session");
        let state = AgentState::new(id);
        self.sessions.insert(id.to_string(), state.clone());
        self.persist();
        state
    }

    /// Replace the entry for the record's conversation id and persist
    ///
    /// The entry's history is truncated to the most recent
    /// [`MAX_HISTORY_PER_SESSION`] turns before the write.
    pub fn update(&mut self, mut state: AgentState) {
        truncate_history(&mut state, MAX_HISTORY_PER_SESSION);
        self.sessions.insert(state.conversation_id.clone(), state);
        self.persist();
    }

    /// Remove every session and persist the empty store
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.persist();
    }

    /// Number of sessions currently held
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no sessions are held
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Conversation ids ordered most-recently-active first
    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<(String, DateTime<Utc>)> = self
            .sessions
            .iter()
            .map(|(id, state)| (id.clone(), last_activity(state)))
            .collect();
        ids.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ids.into_iter().map(|(id, _)| id).collect()
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enforce all bounds and rewrite the backing file
    ///
    /// Never fails: serialization or I/O problems are logged and the
    /// in-memory view keeps going.
    fn persist(&mut self) {
        // 1. Per-entry history truncation
        for state in self.sessions.values_mut() {
            truncate_history(state, MAX_HISTORY_PER_SESSION);
        }

        // 2. Count bound: evict least-recently-active entries
        while self.sessions.len() > MAX_SESSIONS {
            self.evict_least_recent();
        }

        // 3. Serialize
        let mut bytes = match self.serialize() {
            Some(bytes) => bytes,
            None => return,
        };

        // 4. Byte bound: evict one entry at a time while possible
        while bytes.len() > MAX_FILE_BYTES && self.sessions.len() > 1 {
            self.evict_least_recent();
            bytes = match self.serialize() {
                Some(bytes) => bytes,
                None => return,
            };
        }

        // 5. Last resort: halve every remaining history once
        if bytes.len() > MAX_FILE_BYTES {
            warn!(
                size = bytes.len(),
                budget = MAX_FILE_BYTES,
                "session file over budget after eviction, halving histories"
            );
            for state in self.sessions.values_mut() {
                let keep = state.history.len() / 2;
                truncate_history(state, keep);
            }
            bytes = match self.serialize() {
                Some(bytes) => bytes,
                None => return,
            };
        }

        // 6. Atomic replace
        if let Err(e) = write_atomic(&self.path, &bytes) {
            warn!(path = %self.path.display(), error = %e, "failed to save sessions");
        }
    }

    fn serialize(&self) -> Option<Vec<u8>> {
        let envelope = SessionFileRef {
            version: FORMAT_VERSION,
            sessions: &self.sessions,
        };
        match serde_json::to_vec(&envelope) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "failed to serialize sessions");
                None
            }
        }
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .map(|(id, state)| (id.clone(), last_activity(state)))
            // Tie-break on id so eviction order is deterministic
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        if let Some((id, _)) = oldest {
            info!(conversation = %id, "evicting least-recently-active session");
            self.sessions.remove(&id);
        }
    }
}

/// Timestamp of the entry's last history item; entries with no history rank
/// oldest
fn last_activity(state: &AgentState) -> DateTime<Utc> {
    state
        .history
        .last()
        .map(|m| m.timestamp)
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Keep only the most recent `keep` history turns
fn truncate_history(state: &mut AgentState, keep: usize) {
    let len = state.history.len();
    if len > keep {
        state.history.drain(..len - keep);
    }
}

/// Read and validate the backing file; any problem yields an empty map
fn load_sessions(path: &Path) -> HashMap<String, AgentState> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read session file");
            return HashMap::new();
        }
    };

    if raw.is_empty() {
        return HashMap::new();
    }

    match serde_json::from_slice::<SessionFile>(&raw) {
        Ok(file) if file.version == FORMAT_VERSION => file.sessions,
        Ok(file) => {
            warn!(
                version = file.version,
                expected = FORMAT_VERSION,
                "unrecognized session file version, discarding"
            );
            HashMap::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "session file unreadable, discarding");
            HashMap::new()
        }
    }
}

/// Write bytes to `path` via a temp file and rename
///
/// The rename makes the replacement atomic from a reader's perspective: the
/// previous contents stay intact until the new file is fully on disk.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    {
        use std::io::Write;
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatMessage;
    use chrono::Duration;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SessionStore {
        SessionStore::open(dir.path().join("sessions.json"))
    }

    fn state_active_at(id: &str, at: DateTime<Utc>) -> AgentState {
        let mut state = AgentState::new(id);
        let mut message = ChatMessage::user("hello");
        message.timestamp = at;
        state.history.push(message);
        state
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_or_create_persists_fresh_session() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let state = store.get_or_create("conv-1");
        assert_eq!(state.conversation_id, "conv-1");
        assert!(store.path().exists());

        // Second call returns the existing entry, not a fresh one
        let mut updated = state;
        updated.response = "remembered".to_string();
        store.update(updated);
        let again = store.get_or_create("conv-1");
        assert_eq!(again.response, "remembered");
    }

    #[test]
    fn test_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");

        {
            let mut store = SessionStore::open(&path);
            let mut state = store.get_or_create("conv-1");
            state.history.push(ChatMessage::user("what's on screen?"));
            state.response = "a login form".to_string();
            store.update(state);
        }

        let mut store = SessionStore::open(&path);
        let state = store.get_or_create("conv-1");
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.response, "a login form");
    }

    #[test]
    fn test_file_carries_format_version() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.get_or_create("conv-1");

        let raw = fs::read(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["sessions"]["conv-1"].is_object());
    }

    #[test]
    fn test_unknown_version_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, r#"{"version": 99, "sessions": {"conv-1": {}}}"#).unwrap();

        let store = SessionStore::open(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_unversioned_file_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, r#"{"conv-1": {"conversation_id": "conv-1"}}"#).unwrap();

        let store = SessionStore::open(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, b"{not json").unwrap();

        let store = SessionStore::open(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_history_truncated_on_update() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let mut state = store.get_or_create("conv-1");
        for i in 0..(MAX_HISTORY_PER_SESSION + 25) {
            state.history.push(ChatMessage::user(format!("turn {i}")));
        }
        store.update(state);

        let state = store.get_or_create("conv-1");
        assert_eq!(state.history.len(), MAX_HISTORY_PER_SESSION);
        // The most recent turns survive
        assert_eq!(
            state.history.last().unwrap().content,
            format!("turn {}", MAX_HISTORY_PER_SESSION + 24)
        );
    }

    #[test]
    fn test_session_count_bound_evicts_least_recent() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        let base = Utc::now();
        for i in 0..(MAX_SESSIONS + 5) {
            // conv-00 is oldest, conv-24 newest
            let state = state_active_at(
                &format!("conv-{i:02}"),
                base + Duration::seconds(i as i64),
            );
            store.update(state);
        }

        assert_eq!(store.len(), MAX_SESSIONS);
        let ids = store.conversation_ids();
        // The five oldest were evicted
        assert!(!ids.contains(&"conv-00".to_string()));
        assert!(!ids.contains(&"conv-04".to_string()));
        assert!(ids.contains(&"conv-05".to_string()));
        assert_eq!(ids.first().unwrap(), &format!("conv-{:02}", MAX_SESSIONS + 4));
    }

    #[test]
    fn test_byte_budget_evicts_then_halves() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        // Two sessions with bulky histories: ~40 turns x ~64 KiB each puts
        // the serialized form well over 2 MiB
        let base = Utc::now();
        for (i, id) in ["conv-a", "conv-b"].iter().enumerate() {
            let mut state = AgentState::new(*id);
            for turn in 0..40 {
                let mut message = ChatMessage::user("x".repeat(64 * 1024));
                message.timestamp = base + Duration::seconds((i * 100 + turn) as i64);
                state.history.push(message);
            }
            store.update(state);
        }

        // conv-a (older) must have been evicted to meet the budget
        assert_eq!(store.len(), 1);
        assert_eq!(store.conversation_ids(), vec!["conv-b".to_string()]);

        let size = fs::metadata(store.path()).unwrap().len() as usize;
        assert!(size <= MAX_FILE_BYTES, "file still over budget: {size}");
    }

    #[test]
    fn test_single_entry_degenerate_case_halves_history() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);

        // One conversation too large on its own: eviction can't help (the
        // store never drops its last entry), so histories get halved
        let mut state = AgentState::new("conv-big");
        for _ in 0..40 {
            state.history.push(ChatMessage::user("x".repeat(128 * 1024)));
        }
        store.update(state);

        assert_eq!(store.len(), 1);
        let state = store.get_or_create("conv-big");
        assert!(state.history.len() <= 20);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.get_or_create("conv-1");

        assert!(store.path().exists());
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.get_or_create("conv-1");
        store.get_or_create("conv-2");

        store.clear();
        assert!(store.is_empty());

        // The empty store round-trips
        let store = SessionStore::open(store.path().to_path_buf());
        assert!(store.is_empty());
    }
}
