//! Hook capture pipeline
//!
//! Entry points invoked by editor and git hook scripts. Every invocation is a
//! short-lived process: parse the event, do one unit of work against the
//! store, print one line, exit.
//!
//! Events:
//! - file-touched: an assistant edited a file in a conversation
//! - session-end:  a conversation finished; enrich it from its source
//! - commit:       a commit landed; record it and run the auto-link pass
//!
//! Payloads arrive as JSON on stdin and/or as CLI flags. Missing or malformed
//! pieces degrade the result, they never fail the invocation.

mod commit;
mod file_touched;
pub mod git;
mod session_end;
mod workspace;

pub use commit::{handle_commit, record_commit};
pub use file_touched::handle_file_touched;
pub use session_end::{fetch_summary, handle_session_end};
pub use workspace::{resolve_for_file, resolve_for_files};

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::reader::ReaderRegistry;
use crate::store::with_store;
use crate::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    FileTouched,
    SessionEnd,
    Commit,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::FileTouched => "file-touched",
            HookEvent::SessionEnd => "session-end",
            HookEvent::Commit => "commit",
        }
    }

    /// Map an event name to a handler. Case, `-` and `_` are ignored so the
    /// spellings different editors use all resolve.
    pub fn parse(name: &str) -> Option<Self> {
        let folded: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(|c| c.to_lowercase())
            .collect();
        match folded.as_str() {
            "filetouched" | "afterfileedit" | "posttooluse" => Some(HookEvent::FileTouched),
            "sessionend" | "stop" => Some(HookEvent::SessionEnd),
            "commit" | "postcommit" => Some(HookEvent::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields a hook may receive, from whichever editor sent it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookPayload {
    pub event: Option<String>,
    pub conversation_id: Option<String>,
    pub file_path: Option<String>,
    pub workspace_root: Option<String>,
    pub agent: Option<String>,
    pub commit: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
}

impl HookPayload {
    /// Parse a JSON payload. Anything unreadable becomes an empty payload.
    pub fn from_json(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => Self::from_value(&value),
            Ok(other) => {
                debug!(kind = %json_kind(&other), "hook payload is not an object, ignoring");
                Self::default()
            }
            Err(e) => {
                debug!("malformed hook payload: {e}");
                Self::default()
            }
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let agent = string_at(value, &["agent", "source"]).or_else(|| {
            // Claude Code payloads always carry a transcript path
            value
                .get("transcript_path")
                .is_some()
                .then(|| "claude-code".to_string())
        });

        Self {
            event: string_at(value, &["hook_event_name", "hookEventName", "event"]),
            conversation_id: string_at(
                value,
                &["conversation_id", "conversationId", "session_id", "sessionId"],
            ),
            file_path: string_at(value, &["file_path", "filePath"]).or_else(|| {
                value
                    .get("tool_input")
                    .or_else(|| value.get("toolInput"))
                    .and_then(|input| string_at(input, &["file_path", "filePath", "path"]))
            }),
            workspace_root: string_at(value, &["workspace_root", "workspaceRoot"])
                .or_else(|| {
                    value
                        .get("workspace_roots")
                        .or_else(|| value.get("workspaceRoots"))
                        .and_then(|roots| roots.get(0))
                        .and_then(|r| r.as_str())
                        .map(String::from)
                })
                .or_else(|| string_at(value, &["cwd"])),
            agent,
            commit: string_at(value, &["commit_hash", "commitHash", "commit", "sha"]),
            title: string_at(value, &["title"]),
            summary: string_at(value, &["summary"]),
        }
    }

    /// Fill every unset field from `fallback`; values already present win.
    pub fn or(self, fallback: HookPayload) -> Self {
        Self {
            event: self.event.or(fallback.event),
            conversation_id: self.conversation_id.or(fallback.conversation_id),
            file_path: self.file_path.or(fallback.file_path),
            workspace_root: self.workspace_root.or(fallback.workspace_root),
            agent: self.agent.or(fallback.agent),
            commit: self.commit.or(fallback.commit),
            title: self.title.or(fallback.title),
            summary: self.summary.or(fallback.summary),
        }
    }
}

fn string_at(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What an invocation did; printed as one line by the CLI
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Conversation {
        event: HookEvent,
        id: String,
        captured_files: usize,
    },
    Commit {
        hash: String,
        changed_files: usize,
        linked: usize,
    },
    /// Recognized event without enough data to record anything
    Skipped { event: HookEvent, reason: String },
    /// Unrecognized event name
    Ignored { event: String },
}

impl fmt::Display for HookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookOutcome::Conversation {
                event,
                id,
                captured_files,
            } => write!(f, "{}: recorded conversation {} ({} captured files)", event, id, captured_files),
            HookOutcome::Commit {
                hash,
                changed_files,
                linked,
            } => write!(
                f,
                "commit: recorded {} ({} files, {} linked conversations)",
                short_hash(hash),
                changed_files,
                linked
            ),
            HookOutcome::Skipped { event, reason } => write!(f, "{}: skipped ({})", event, reason),
            HookOutcome::Ignored { event } => write!(f, "ignored event '{}'", event),
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Everything a handler may consult besides its payload
pub struct HookContext {
    pub config: Config,
    pub registry: Arc<ReaderRegistry>,
    pub cwd: PathBuf,
    pub db_path: PathBuf,
}

impl HookContext {
    pub fn new(config: Config, registry: Arc<ReaderRegistry>, cwd: PathBuf) -> Self {
        let db_path = config.database_path();
        Self {
            config,
            registry,
            cwd,
            db_path,
        }
    }

    fn summary_timeout(&self) -> Duration {
        Duration::from_millis(self.config.hooks.summary_timeout_ms)
    }
}

/// Dispatch one hook event.
///
/// `event` is the name given on the command line, falling back to the name
/// in the payload. Unknown events succeed without touching the store.
pub fn run_hook(ctx: &HookContext, event: Option<&str>, payload: HookPayload) -> Result<HookOutcome> {
    let name = event
        .map(String::from)
        .or_else(|| payload.event.clone())
        .unwrap_or_default();

    let Some(event) = HookEvent::parse(&name) else {
        debug!(event = %name, "unrecognized hook event");
        return Ok(HookOutcome::Ignored { event: name });
    };
    debug!(%event, ?payload, "hook invoked");

    match event {
        HookEvent::FileTouched => with_store(&ctx.db_path, |store| {
            handle_file_touched(store, &payload, &ctx.cwd, Utc::now())
        }),
        HookEvent::SessionEnd => {
            // Enrichment happens before the store is opened
            let summary = payload.conversation_id.as_ref().and_then(|id| {
                fetch_summary(Arc::clone(&ctx.registry), id.clone(), ctx.summary_timeout())
            });
            with_store(&ctx.db_path, |store| {
                handle_session_end(store, &payload, summary, &ctx.cwd, Utc::now())
            })
        }
        HookEvent::Commit => {
            let repo = resolve_repo(&payload, &ctx.cwd);
            let rev = payload.commit.as_deref().unwrap_or("HEAD");
            let commit = git::read_commit(&repo, rev, Utc::now())?;
            with_store(&ctx.db_path, |store| {
                handle_commit(store, &ctx.config.linking, commit, Utc::now())
            })
        }
    }
}

fn resolve_repo(payload: &HookPayload, cwd: &Path) -> PathBuf {
    let start = payload
        .workspace_root
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.to_path_buf());
    git::repo_root(&start).unwrap_or(start)
}
