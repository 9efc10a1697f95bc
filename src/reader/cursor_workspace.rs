//! Cursor per-workspace chat reader
//!
//! Older Cursor builds keep chat state per workspace rather than globally.
//! Data format: SQLite at <config>/Cursor/User/workspaceStorage/<hash>/state.vscdb
//!   - ItemTable holds two shapes under keys that moved between releases:
//!     * tabbed chat: `{"tabs": [{"tabId", "chatTitle", "bubbles": [...]}]}`
//!     * flow/agent:  `{"allComposers": [{"composerId", "name", "conversation": [...]}]}`
//!   - <hash>/workspace.json names the workspace folder as a file:// URI

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::cursor::bubble_to_message;
use super::kv;
use super::{
    decode_file_uri, matches_project, modified_time, read_json_file, truncate_title, Agent,
    CanonicalConversation, CanonicalMessage, ConversationReader, Role,
};
use crate::util::parse_timestamp;

const TABLE: &str = "ItemTable";

/// Tabbed chat keys, newest spelling first
const CHAT_KEYS: &[&str] = &[
    "workbench.panel.aichat.view.aichat.chatdata",
    "aiService.chatdata",
];

/// Flow/agent keys, newest spelling first
const FLOW_KEYS: &[&str] = &[
    "composer.composerData",
    "workbench.panel.composerChatViewPane.composerData",
];

/// One workspace database with its resolved folder
struct Workspace {
    hash: String,
    db_path: PathBuf,
    folder: Option<String>,
}

/// Which of the two blob shapes a conversation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Chat,
    Flow,
}

impl Shape {
    fn as_str(&self) -> &'static str {
        match self {
            Shape::Chat => "chat",
            Shape::Flow => "flow",
        }
    }
}

pub struct CursorWorkspaceReader {
    base_path: PathBuf,
}

impl CursorWorkspaceReader {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_default()
                .join("Cursor/User/workspaceStorage")
        });
        Self { base_path }
    }

    fn workspaces(&self) -> Result<Vec<Workspace>> {
        let pattern = format!(
            "{}/*/state.vscdb",
            glob::Pattern::escape(&self.base_path.to_string_lossy())
        );

        let mut workspaces = vec![];
        for entry in glob::glob(&pattern).context("Invalid workspace glob")? {
            let db_path = match entry {
                Ok(p) => p,
                Err(e) => {
                    debug!("skipping unreadable workspace entry: {e}");
                    continue;
                }
            };
            let Some(dir) = db_path.parent() else {
                continue;
            };
            let hash = dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            workspaces.push(Workspace {
                hash,
                folder: workspace_folder(dir),
                db_path,
            });
        }
        Ok(workspaces)
    }

    /// Every conversation stored in one workspace database
    fn read_workspace(&self, workspace: &Workspace) -> Result<Vec<CanonicalConversation>> {
        let conn = kv::open_read_only(&workspace.db_path)?;
        if !kv::has_table(&conn, TABLE)? {
            return Ok(vec![]);
        }
        let fallback_ts = modified_time(&workspace.db_path).unwrap_or_else(Utc::now);

        let mut conversations = vec![];

        if let Some((key, raw)) = kv::first_present(&conn, TABLE, CHAT_KEYS)? {
            match serde_json::from_str::<Value>(&raw) {
                Ok(blob) => {
                    for tab in blob.get("tabs").and_then(|t| t.as_array()).into_iter().flatten() {
                        if let Some(c) = tab_to_conversation(tab, fallback_ts) {
                            conversations.push(c);
                        }
                    }
                }
                Err(e) => debug!(%key, workspace = %workspace.hash, "malformed chat blob: {e}"),
            }
        }

        if let Some((key, raw)) = kv::first_present(&conn, TABLE, FLOW_KEYS)? {
            match serde_json::from_str::<Value>(&raw) {
                Ok(blob) => {
                    let composers = blob.get("allComposers").and_then(|c| c.as_array());
                    for composer in composers.into_iter().flatten() {
                        if let Some(c) = composer_to_conversation(composer, fallback_ts) {
                            conversations.push(c);
                        }
                    }
                }
                Err(e) => debug!(%key, workspace = %workspace.hash, "malformed flow blob: {e}"),
            }
        }

        for conversation in &mut conversations {
            conversation.project_path = workspace.folder.clone();
            conversation
                .metadata
                .insert("workspace".into(), Value::from(workspace.hash.clone()));
        }
        Ok(conversations)
    }
}

/// Folder a workspace hash directory belongs to, from workspace.json
pub(super) fn workspace_folder(dir: &Path) -> Option<String> {
    let json = read_json_file(&dir.join("workspace.json")).ok().flatten()?;
    json.get("folder")
        .or_else(|| json.get("workspace"))
        .and_then(|f| f.as_str())
        .map(decode_file_uri)
}

/// (created, updated) with sensible fallbacks and `updated >= created`
fn stamp(
    updated: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
    fallback: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let created = created.or(updated).unwrap_or(fallback);
    let updated = updated.unwrap_or(created).max(created);
    (created, updated)
}

fn finalize(
    mut conversation: CanonicalConversation,
    title: Option<&str>,
    shape: Shape,
) -> CanonicalConversation {
    conversation.title = title
        .filter(|t| !t.trim().is_empty())
        .map(String::from);
    conversation
        .metadata
        .insert("shape".into(), Value::from(shape.as_str()));
    let mut conversation = conversation.finish();
    if conversation.title.is_none() {
        conversation.title = conversation
            .messages
            .iter()
            .find(|m| m.role == Role::User && !m.text.trim().is_empty())
            .map(|m| truncate_title(&m.text));
    }
    conversation
}

/// Tabbed chat: bubbles use `"type": "user" | "ai"`
fn tab_to_conversation(tab: &Value, fallback: DateTime<Utc>) -> Option<CanonicalConversation> {
    let id = tab.get("tabId").and_then(|t| t.as_str())?;
    let bubbles = tab.get("bubbles").and_then(|b| b.as_array());

    let messages: Vec<CanonicalMessage> = bubbles
        .into_iter()
        .flatten()
        .filter_map(bubble_to_message)
        .collect();

    let updated = tab.get("lastSendTime").and_then(parse_timestamp);
    let created = bubbles
        .and_then(|b| b.first())
        .and_then(|b| b.get("createdAt"))
        .and_then(parse_timestamp);
    let (created, updated) = stamp(updated, created, fallback);

    let mut conversation = CanonicalConversation::new(id, Agent::CursorWorkspace, created);
    conversation.updated_at = updated;
    conversation.messages = messages;
    Some(finalize(
        conversation,
        tab.get("chatTitle").and_then(|t| t.as_str()),
        Shape::Chat,
    ))
}

/// Flow/agent composer: single thread, same bubble shape as global composers
fn composer_to_conversation(
    composer: &Value,
    fallback: DateTime<Utc>,
) -> Option<CanonicalConversation> {
    let id = composer.get("composerId").and_then(|c| c.as_str())?;
    let updated = composer.get("lastUpdatedAt").and_then(parse_timestamp);
    let created = composer.get("createdAt").and_then(parse_timestamp);
    let (created, updated) = stamp(updated, created, fallback);

    let mut conversation = CanonicalConversation::new(id, Agent::CursorWorkspace, created);
    conversation.updated_at = updated;
    conversation.messages = composer
        .get("conversation")
        .and_then(|c| c.as_array())
        .map(|items| items.iter().filter_map(bubble_to_message).collect())
        .unwrap_or_default();
    Some(finalize(
        conversation,
        composer.get("name").and_then(|n| n.as_str()),
        Shape::Flow,
    ))
}

impl ConversationReader for CursorWorkspaceReader {
    fn agent(&self) -> Agent {
        Agent::CursorWorkspace
    }

    fn description(&self) -> &str {
        "Cursor chat and flow sessions (per-workspace databases)"
    }

    fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn get_conversation_ids(&self, project: Option<&str>) -> Result<Vec<String>> {
        if !self.is_available() {
            return Ok(vec![]);
        }

        let mut ids = vec![];
        for workspace in self.workspaces()? {
            if let Some(project) = project {
                if !matches_project(workspace.folder.as_deref(), project) {
                    continue;
                }
            }
            match self.read_workspace(&workspace) {
                Ok(conversations) => ids.extend(conversations.into_iter().map(|c| c.id)),
                Err(e) => debug!(workspace = %workspace.hash, "skipping workspace: {e:#}"),
            }
        }
        Ok(ids)
    }

    fn get_conversation(&self, id: &str) -> Result<Option<CanonicalConversation>> {
        if !self.is_available() {
            return Ok(None);
        }

        for workspace in self.workspaces()? {
            let conversations = match self.read_workspace(&workspace) {
                Ok(c) => c,
                Err(e) => {
                    debug!(workspace = %workspace.hash, "skipping workspace: {e:#}");
                    continue;
                }
            };
            if let Some(found) = conversations.into_iter().find(|c| c.id == id) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
