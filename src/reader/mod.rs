//! Conversation reader trait and registry
//!
//! Every supported assistant persists sessions in its own format. A reader
//! knows how to enumerate and parse one of those formats into a
//! [`CanonicalConversation`]; everything downstream (hooks, linker, CLI) only
//! ever sees the canonical shape.
//!
//! Readers:
//! - ClaudeCode: JSONL transcripts under ~/.claude/projects
//! - Cursor: `cursorDiskKV` composer blobs in the global state database
//! - CursorWorkspace: `ItemTable` chat/flow blobs in per-workspace databases
//! - Cline: ui/api JSON pairs per task directory
//! - Copilot: per-workspace chat session JSON files

mod claude_code;
mod cline;
mod copilot;
mod cursor;
mod cursor_workspace;
mod kv;

pub use claude_code::ClaudeCodeReader;
pub use cline::ClineReader;
pub use copilot::CopilotReader;
pub use cursor::CursorReader;
pub use cursor_workspace::CursorWorkspaceReader;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use url::Url;

use crate::util::normalize_for_match;
use crate::Config;

/// Field names that carry a file path in tool invocation inputs.
pub const FILE_PATH_FIELDS: &[&str] = &["file_path", "path", "notebook_path", "filePath"];

/// Source system a conversation was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Agent {
    ClaudeCode,
    Cursor,
    CursorWorkspace,
    Cline,
    Copilot,
}

impl Agent {
    pub const ALL: [Agent; 5] = [
        Agent::ClaudeCode,
        Agent::Cursor,
        Agent::CursorWorkspace,
        Agent::Cline,
        Agent::Copilot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::ClaudeCode => "claude-code",
            Agent::Cursor => "cursor",
            Agent::CursorWorkspace => "cursor-workspace",
            Agent::Cline => "cline",
            Agent::Copilot => "copilot",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Agent::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown source: {}", s))
    }
}

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Map the role spellings used across sources. Unknown roles are `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" | "bot" | "model" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Code fragment attached to a message
#[derive(Debug, Clone, PartialEq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub content: String,
}

/// One normalized message
#[derive(Debug, Clone)]
pub struct CanonicalMessage {
    pub role: Role,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub code_blocks: Vec<CodeBlock>,
    pub files: Vec<String>,
}

impl CanonicalMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: None,
            code_blocks: vec![],
            files: vec![],
        }
    }
}

/// Source-agnostic conversation, rebuilt from the backing store on every read
#[derive(Debug, Clone)]
pub struct CanonicalConversation {
    pub id: String,
    pub source: Agent,
    pub project_path: Option<String>,
    pub title: Option<String>,
    pub messages: Vec<CanonicalMessage>,
    pub files: BTreeSet<String>,
    pub folders: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl CanonicalConversation {
    /// Empty conversation stamped with `ts` for both creation and update.
    pub fn new(id: impl Into<String>, source: Agent, ts: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            source,
            project_path: None,
            title: None,
            messages: vec![],
            files: BTreeSet::new(),
            folders: BTreeSet::new(),
            created_at: ts,
            updated_at: ts,
            metadata: Map::new(),
        }
    }

    /// Fold per-message file references into the conversation set and widen
    /// the time range to cover every message timestamp.
    pub fn finish(mut self) -> Self {
        for msg in &self.messages {
            self.files.extend(msg.files.iter().cloned());
            if let Some(ts) = msg.timestamp {
                if ts < self.created_at {
                    self.created_at = ts;
                }
                if ts > self.updated_at {
                    self.updated_at = ts;
                }
            }
        }
        self.files.retain(|f| !f.trim().is_empty());
        self
    }

    /// Case-insensitive substring match over message text.
    /// `needle` must already be lowercase.
    pub fn text_contains(&self, needle: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.text.to_lowercase().contains(needle))
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            source: self.source,
            title: self.title.clone(),
            summary: None,
            relevant_files: self.files.iter().cloned().collect(),
            attached_folders: self.folders.iter().cloned().collect(),
            project_path: self.project_path.clone(),
            updated_at: Some(self.updated_at),
        }
    }
}

/// Summary-level view used for enrichment
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: String,
    pub source: Agent,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub relevant_files: Vec<String>,
    pub attached_folders: Vec<String>,
    pub project_path: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Options for text search
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub project: Option<String>,
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            project: None,
            limit: 20,
        }
    }
}

/// Capability set every source format implements
pub trait ConversationReader: Send + Sync {
    /// Source tag
    fn agent(&self) -> Agent;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Check if this reader's backing store exists
    fn is_available(&self) -> bool;

    /// Enumerate conversation ids, optionally limited to one project path
    fn get_conversation_ids(&self, project: Option<&str>) -> Result<Vec<String>>;

    /// Parse one conversation; `None` when the id is unknown to this source
    fn get_conversation(&self, id: &str) -> Result<Option<CanonicalConversation>>;

    /// Title/summary/files only. Readers with expensive per-message
    /// resolution override this to skip it.
    fn get_conversation_summary(&self, id: &str) -> Result<Option<ConversationSummary>> {
        Ok(self.get_conversation(id)?.map(|c| c.summary()))
    }

    /// All conversations of a project, most recently updated first
    fn get_conversations_by_project(&self, project: &str) -> Result<Vec<CanonicalConversation>> {
        let mut conversations = vec![];
        for id in self.get_conversation_ids(Some(project))? {
            match self.get_conversation(&id) {
                Ok(Some(c)) => conversations.push(c),
                Ok(None) => {}
                Err(e) => debug!(source = %self.agent(), %id, "skipping conversation: {e:#}"),
            }
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    /// Conversations whose message text contains `query` (case-insensitive),
    /// stopping as soon as `limit` matches are found
    fn search_conversations(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<CanonicalConversation>> {
        let needle = query.to_lowercase();
        let mut results = vec![];
        if options.limit == 0 {
            return Ok(results);
        }

        for id in self.get_conversation_ids(options.project.as_deref())? {
            let conversation = match self.get_conversation(&id) {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(e) => {
                    debug!(source = %self.agent(), %id, "skipping conversation: {e:#}");
                    continue;
                }
            };
            if conversation.text_contains(&needle) {
                results.push(conversation);
                if results.len() >= options.limit {
                    break;
                }
            }
        }
        Ok(results)
    }
}

/// Registry of configured readers
pub struct ReaderRegistry {
    readers: Vec<Box<dyn ConversationReader>>,
}

impl ReaderRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self::empty();

        if config.is_reader_enabled(Agent::ClaudeCode.as_str()) {
            let path = config.reader_path(Agent::ClaudeCode.as_str());
            registry.register(Box::new(ClaudeCodeReader::new(path)));
        }

        if config.is_reader_enabled(Agent::Cursor.as_str()) {
            let path = config.reader_path(Agent::Cursor.as_str());
            registry.register(Box::new(CursorReader::new(path)));
        }

        if config.is_reader_enabled(Agent::CursorWorkspace.as_str()) {
            let path = config.reader_path(Agent::CursorWorkspace.as_str());
            registry.register(Box::new(CursorWorkspaceReader::new(path)));
        }

        if config.is_reader_enabled(Agent::Cline.as_str()) {
            let path = config.reader_path(Agent::Cline.as_str());
            registry.register(Box::new(ClineReader::new(path)));
        }

        if config.is_reader_enabled(Agent::Copilot.as_str()) {
            let path = config.reader_path(Agent::Copilot.as_str());
            registry.register(Box::new(CopilotReader::new(path)));
        }

        registry
    }

    pub fn empty() -> Self {
        Self { readers: vec![] }
    }

    pub fn register(&mut self, reader: Box<dyn ConversationReader>) {
        self.readers.push(reader);
    }

    pub fn available_readers(&self) -> Vec<&dyn ConversationReader> {
        self.readers
            .iter()
            .filter(|r| r.is_available())
            .map(|r| r.as_ref())
            .collect()
    }

    pub fn all_readers(&self) -> Vec<&dyn ConversationReader> {
        self.readers.iter().map(|r| r.as_ref()).collect()
    }

    pub fn get_reader(&self, tag: &str) -> Option<&dyn ConversationReader> {
        self.readers
            .iter()
            .find(|r| r.agent().as_str().eq_ignore_ascii_case(tag))
            .map(|r| r.as_ref())
    }

    /// First available reader that knows `id`
    pub fn find_conversation(&self, id: &str) -> Result<Option<CanonicalConversation>> {
        for reader in self.available_readers() {
            match reader.get_conversation(id) {
                Ok(Some(c)) => return Ok(Some(c)),
                Ok(None) => {}
                Err(e) => debug!(source = %reader.agent(), %id, "lookup failed: {e:#}"),
            }
        }
        Ok(None)
    }

    /// First summary any available reader can produce for `id`.
    /// Reader errors are logged and treated as a miss.
    pub fn find_summary(&self, id: &str) -> Option<ConversationSummary> {
        for reader in self.available_readers() {
            match reader.get_conversation_summary(id) {
                Ok(Some(summary)) => return Some(summary),
                Ok(None) => {}
                Err(e) => debug!(source = %reader.agent(), %id, "summary lookup failed: {e:#}"),
            }
        }
        None
    }

    /// Search every available reader and merge by recency
    pub fn search_all(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<CanonicalConversation>> {
        let mut merged = vec![];
        for reader in self.available_readers() {
            match reader.search_conversations(query, options) {
                Ok(found) => merged.extend(found),
                Err(e) => debug!(source = %reader.agent(), "search failed: {e:#}"),
            }
        }
        merged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        merged.truncate(options.limit);
        Ok(merged)
    }
}

// ============================================
// SHARED PARSING HELPERS
// ============================================

/// First line of `text`, capped at 100 characters
pub(crate) fn truncate_title(text: &str) -> String {
    let first_line = text.trim().lines().next().unwrap_or("").trim();
    if first_line.chars().count() > 100 {
        let head: String = first_line.chars().take(97).collect();
        format!("{}...", head)
    } else {
        first_line.to_string()
    }
}

/// Whether a conversation's project path falls under `filter`
pub(crate) fn matches_project(project_path: Option<&str>, filter: &str) -> bool {
    let Some(project) = project_path else {
        return false;
    };
    let project = normalize_for_match(project);
    let filter = normalize_for_match(filter);
    let project = project.trim_end_matches('/');
    let filter = filter.trim_end_matches('/');
    if filter.is_empty() {
        return false;
    }
    project == filter || project.starts_with(&format!("{}/", filter))
}

/// Recursively collect string values stored under any of `keys`
pub(crate) fn collect_strings_by_key(value: &Value, keys: &[&str], out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if keys.contains(&k.as_str()) {
                    if let Some(s) = v.as_str() {
                        if !s.trim().is_empty() {
                            out.push(s.to_string());
                        }
                        continue;
                    }
                }
                collect_strings_by_key(v, keys, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_strings_by_key(item, keys, out);
            }
        }
        _ => {}
    }
}

/// File path fields of a tool invocation input (top level only)
pub(crate) fn tool_input_files(input: &Value) -> Vec<String> {
    FILE_PATH_FIELDS
        .iter()
        .filter_map(|field| input.get(*field).and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
        .collect()
}

/// `file:///Users/me/proj` -> `/Users/me/proj`, with %XX escapes decoded.
/// Anything that is not a `file:` URL is taken as an already-plain path.
pub(crate) fn decode_file_uri(uri: &str) -> String {
    let encoded = match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => url.path().to_string(),
        _ => uri.to_string(),
    };
    let path = urlencoding::decode(&encoded)
        .map(|p| p.into_owned())
        .unwrap_or(encoded);
    // file:///c%3A/x decodes to /c:/x on Windows workspaces
    match path.as_bytes() {
        [b'/', drive, b':', ..] if drive.is_ascii_alphabetic() => path[1..].to_string(),
        _ => path,
    }
}

/// Read and parse a JSON file, `None` when it does not exist
pub(crate) fn read_json_file(path: &std::path::Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Modification time of a path, used when a source carries no timestamps
pub(crate) fn modified_time(path: &std::path::Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from)
}
