use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DroverError, Result};
use crate::message::Message;

/// Session identifiers increase monotonically for the lifetime of the process.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// A persisted grant that satisfies future authorization checks without re-prompting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AuthScope {
    /// A file, or a directory and everything below it.
    Path(PathBuf),
    /// A network domain, exact or `*.suffix`.
    Domain(String),
    /// A shell command prefix, matched on word boundaries.
    CommandPrefix(String),
}

impl fmt::Display for AuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScope::Path(p) => write!(f, "path {}", p.display()),
            AuthScope::Domain(d) => write!(f, "domain {d}"),
            AuthScope::CommandPrefix(c) => write!(f, "command prefix `{c}`"),
        }
    }
}

/// The conversation log plus the authorization state gathered during it.
///
/// Messages are append-only; the only structural rewrite is compaction, which
/// replaces a contiguous prefix with one summary message and is guarded by the
/// `version` counter (every append or splice bumps it).
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    messages: Vec<Message>,
    version: u64,
    files_read: HashMap<PathBuf, String>,
    authorized_commands: BTreeSet<String>,
    authorized_domains: BTreeSet<String>,
    authorized_paths: BTreeSet<PathBuf>,
    compaction_count: u32,
    created_at: DateTime<Utc>,
}

/// A consistent copy of the history taken under the session lock.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub version: u64,
    pub messages: Vec<Message>,
}

/// The session shared between the orchestrator and the authorizer.
pub type SharedSession = Arc<parking_lot::Mutex<Session>>;

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: next_session_id(),
            messages: Vec::new(),
            version: 0,
            files_read: HashMap::new(),
            authorized_commands: BTreeSet::new(),
            authorized_domains: BTreeSet::new(),
            authorized_paths: BTreeSet::new(),
            compaction_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(parking_lot::Mutex::new(self))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn compaction_count(&self) -> u32 {
        self.compaction_count
    }

    /// Append a message, stamping it with this session's id. Returns the new version.
    pub fn append(&mut self, mut message: Message) -> u64 {
        message.session_id = self.id;
        self.messages.push(message);
        self.version += 1;
        self.version
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            version: self.version,
            messages: self.messages.clone(),
        }
    }

    /// Replace `messages[..prefix_len]` with `summary`, but only if nothing has
    /// touched the history since the snapshot at `expected_version` was taken.
    pub fn splice_compacted(
        &mut self,
        expected_version: u64,
        prefix_len: usize,
        mut summary: Message,
    ) -> Result<()> {
        if self.version != expected_version {
            return Err(DroverError::SessionConflict {
                expected: expected_version,
                found: self.version,
            });
        }
        if prefix_len == 0 || prefix_len >= self.messages.len() {
            return Err(DroverError::Agent(format!(
                "invalid compaction prefix {prefix_len} for {} messages",
                self.messages.len()
            )));
        }
        summary.session_id = self.id;
        self.messages.splice(..prefix_len, std::iter::once(summary));
        self.version += 1;
        self.compaction_count += 1;
        debug!(session = self.id, replaced = prefix_len, "compacted session prefix");
        Ok(())
    }

    // ── File reads ─────────────────────────────────────────────

    pub fn track_file_read(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files_read.insert(path.into(), content.into());
    }

    pub fn has_read(&self, path: &Path) -> bool {
        self.files_read.contains_key(path)
    }

    /// Content last seen when `path` was read in this session.
    pub fn read_content(&self, path: &Path) -> Option<&str> {
        self.files_read.get(path).map(String::as_str)
    }

    // ── Grants ─────────────────────────────────────────────────

    /// Record an approved authorization scope for the rest of the session.
    pub fn grant(&mut self, scope: &AuthScope) {
        match scope {
            AuthScope::Path(p) => {
                self.authorized_paths.insert(p.clone());
            }
            AuthScope::Domain(d) => {
                self.authorized_domains.insert(d.to_ascii_lowercase());
            }
            AuthScope::CommandPrefix(c) => {
                self.authorized_commands.insert(c.trim().to_string());
            }
        }
    }

    pub fn authorized_paths(&self) -> impl Iterator<Item = &Path> {
        self.authorized_paths.iter().map(PathBuf::as_path)
    }

    pub fn authorized_domains(&self) -> impl Iterator<Item = &str> {
        self.authorized_domains.iter().map(String::as_str)
    }

    pub fn authorized_commands(&self) -> impl Iterator<Item = &str> {
        self.authorized_commands.iter().map(String::as_str)
    }

    /// Drop history, reads, and grants and start over under a fresh id.
    pub fn clear(&mut self) {
        self.id = next_session_id();
        self.messages.clear();
        self.version += 1;
        self.files_read.clear();
        self.authorized_commands.clear();
        self.authorized_domains.clear();
        self.authorized_paths.clear();
        self.compaction_count = 0;
        self.created_at = Utc::now();
    }
}
