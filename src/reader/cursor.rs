//! Cursor composer reader
//!
//! Extracts composer (chat/agent) sessions from Cursor's global state database.
//! Data format: SQLite at <config>/Cursor/User/globalStorage/state.vscdb
//!   - cursorDiskKV: `composerData:<composerId>` -> composer JSON
//!   - cursorDiskKV: `bubbleId:<composerId>:<bubbleId>` -> message JSON
//!
//! Two composer layouts exist:
//!   - legacy: messages inline under `conversation`
//!   - modern (has `_v`): `fullConversationHeadersOnly` lists bubble headers
//!     that must each be resolved against their own key

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

use super::kv;
use super::{
    collect_strings_by_key, matches_project, truncate_title, Agent, CanonicalConversation,
    CanonicalMessage, CodeBlock, ConversationReader, ConversationSummary, Role,
};
use crate::util::{infer_workspace_root, parse_timestamp};

const TABLE: &str = "cursorDiskKV";
const COMPOSER_PREFIX: &str = "composerData:";
const BUBBLE_PREFIX: &str = "bubbleId:";

/// Keys under which Cursor records file paths in composer/bubble context
const CONTEXT_PATH_KEYS: &[&str] = &["fsPath", "relativeWorkspacePath"];

pub struct CursorReader {
    db_path: PathBuf,
}

impl CursorReader {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let db_path = custom_path.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_default()
                .join("Cursor/User/globalStorage/state.vscdb")
        });
        Self { db_path }
    }

    fn open_db(&self) -> Result<Connection> {
        kv::open_read_only(&self.db_path).context("Failed to open Cursor state database")
    }

    fn load_composer(&self, conn: &Connection, id: &str) -> Result<Option<Value>> {
        let key = format!("{}{}", COMPOSER_PREFIX, id);
        match kv::get_value(conn, TABLE, &key)? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("Failed to parse composer JSON")?,
            )),
            None => Ok(None),
        }
    }

    /// Messages of a composer, resolving bubble headers when needed
    fn load_messages(&self, conn: &Connection, id: &str, composer: &Value) -> Vec<CanonicalMessage> {
        if !is_modern(composer) {
            return composer
                .get("conversation")
                .and_then(|c| c.as_array())
                .map(|items| items.iter().filter_map(bubble_to_message).collect())
                .unwrap_or_default();
        }

        let headers = composer
            .get("fullConversationHeadersOnly")
            .and_then(|h| h.as_array())
            .cloned()
            .unwrap_or_default();

        let mut messages = Vec::with_capacity(headers.len());
        for header in &headers {
            let Some(bubble_id) = header.get("bubbleId").and_then(|b| b.as_str()) else {
                continue;
            };
            let key = format!("{}{}:{}", BUBBLE_PREFIX, id, bubble_id);
            let bubble = match kv::get_value(conn, TABLE, &key) {
                Ok(Some(raw)) => serde_json::from_str::<Value>(&raw).ok(),
                Ok(None) => None,
                Err(e) => {
                    debug!(%key, "bubble lookup failed: {e:#}");
                    None
                }
            };
            match bubble {
                Some(mut bubble) => {
                    // Headers carry the authoritative type when the bubble lacks one
                    if bubble.get("type").is_none() {
                        if let (Some(obj), Some(t)) = (bubble.as_object_mut(), header.get("type")) {
                            obj.insert("type".into(), t.clone());
                        }
                    }
                    if let Some(msg) = bubble_to_message(&bubble) {
                        messages.push(msg);
                    }
                }
                None => debug!(%key, "missing bubble"),
            }
        }
        messages
    }
}

/// Presence of the version marker means headers-only storage
fn is_modern(composer: &Value) -> bool {
    composer.get("_v").is_some()
}

/// Files and folders attached at the composer level
fn composer_context(composer: &Value) -> (Vec<String>, Vec<String>) {
    let mut files = vec![];
    let mut folders = vec![];
    if let Some(context) = composer.get("context") {
        if let Some(selections) = context.get("fileSelections") {
            collect_strings_by_key(selections, CONTEXT_PATH_KEYS, &mut files);
        }
        if let Some(selections) = context.get("folderSelections") {
            collect_strings_by_key(selections, CONTEXT_PATH_KEYS, &mut folders);
        }
    }
    if let Some(relevant) = composer.get("relevantFiles").and_then(|r| r.as_array()) {
        files.extend(relevant.iter().filter_map(|f| f.as_str()).map(String::from));
    }
    (files, folders)
}

/// AI summary text, wherever this Cursor version put it
fn composer_summary(composer: &Value) -> Option<String> {
    let latest = composer.get("latestConversationSummary")?;
    let summary = latest.get("summary").unwrap_or(latest);
    summary
        .as_str()
        .or_else(|| summary.get("summary").and_then(|s| s.as_str()))
        .map(String::from)
        .filter(|s| !s.trim().is_empty())
}

/// Summary-level view of a composer blob. Bubble keys are never touched;
/// only inline (legacy) messages contribute their files.
fn summarize(id: &str, composer: &Value) -> ConversationSummary {
    let (mut files, folders) = composer_context(composer);
    if !is_modern(composer) {
        if let Some(items) = composer.get("conversation").and_then(|c| c.as_array()) {
            for msg in items.iter().filter_map(bubble_to_message) {
                files.extend(msg.files);
            }
        }
    }
    files.sort();
    files.dedup();

    let project_path = infer_workspace_root(&files).map(|p| p.to_string_lossy().to_string());

    ConversationSummary {
        id: id.to_string(),
        source: Agent::Cursor,
        title: composer
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.trim().is_empty())
            .map(String::from),
        summary: composer_summary(composer),
        relevant_files: files,
        attached_folders: folders,
        project_path,
        updated_at: composer.get("lastUpdatedAt").and_then(parse_timestamp),
    }
}

/// Map a bubble (inline or resolved) to a message.
///
/// `type` is 1 for user and 2 for assistant; some versions spell it out.
pub(super) fn bubble_to_message(bubble: &Value) -> Option<CanonicalMessage> {
    let role = match bubble.get("type") {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(1) => Role::User,
            Some(2) => Role::Assistant,
            _ => Role::System,
        },
        Some(Value::String(s)) => Role::parse(s).unwrap_or(Role::System),
        _ => Role::System,
    };

    let text = bubble
        .get("text")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .or_else(|| bubble.get("rawText").and_then(|t| t.as_str()))
        .unwrap_or("")
        .to_string();

    let mut msg = CanonicalMessage::new(role, text);

    msg.timestamp = bubble
        .get("createdAt")
        .and_then(parse_timestamp)
        .or_else(|| {
            bubble
                .get("timingInfo")
                .and_then(|t| t.get("clientStartTime"))
                .and_then(parse_timestamp)
        });

    for key in ["codeBlocks", "suggestedCodeBlocks"] {
        if let Some(blocks) = bubble.get(key).and_then(|b| b.as_array()) {
            for block in blocks {
                if let Some(content) = block.get("content").and_then(|c| c.as_str()) {
                    msg.code_blocks.push(CodeBlock {
                        language: block
                            .get("languageId")
                            .or_else(|| block.get("language"))
                            .and_then(|l| l.as_str())
                            .map(String::from),
                        content: content.to_string(),
                    });
                }
            }
        }
    }

    if let Some(relevant) = bubble.get("relevantFiles").and_then(|r| r.as_array()) {
        msg.files
            .extend(relevant.iter().filter_map(|f| f.as_str()).map(String::from));
    }
    for key in ["context", "attachedCodeChunks", "fileSelections"] {
        if let Some(section) = bubble.get(key) {
            collect_strings_by_key(section, CONTEXT_PATH_KEYS, &mut msg.files);
        }
    }
    msg.files.sort();
    msg.files.dedup();

    if msg.text.is_empty() && msg.code_blocks.is_empty() && msg.files.is_empty() {
        return None;
    }
    Some(msg)
}

impl ConversationReader for CursorReader {
    fn agent(&self) -> Agent {
        Agent::Cursor
    }

    fn description(&self) -> &str {
        "Cursor composer sessions (global state database)"
    }

    fn is_available(&self) -> bool {
        self.db_path.exists()
    }

    fn get_conversation_ids(&self, project: Option<&str>) -> Result<Vec<String>> {
        if !self.is_available() {
            return Ok(vec![]);
        }

        let conn = self.open_db()?;
        if !kv::has_table(&conn, TABLE)? {
            return Ok(vec![]);
        }

        let ids: Vec<String> = kv::keys_with_prefix(&conn, TABLE, COMPOSER_PREFIX)?
            .into_iter()
            .filter_map(|k| k.strip_prefix(COMPOSER_PREFIX).map(String::from))
            .collect();

        let Some(project) = project else {
            return Ok(ids);
        };

        // Summary-level data is enough to decide project membership
        let mut filtered = vec![];
        for id in ids {
            if let Some(composer) = self.load_composer(&conn, &id).ok().flatten() {
                let summary = summarize(&id, &composer);
                if matches_project(summary.project_path.as_deref(), project) {
                    filtered.push(id);
                }
            }
        }
        Ok(filtered)
    }

    fn get_conversation(&self, id: &str) -> Result<Option<CanonicalConversation>> {
        if !self.is_available() {
            return Ok(None);
        }

        let conn = self.open_db()?;
        let Some(composer) = self.load_composer(&conn, id)? else {
            return Ok(None);
        };

        let created = composer.get("createdAt").and_then(parse_timestamp);
        let updated = composer.get("lastUpdatedAt").and_then(parse_timestamp);
        let stamp = created.or(updated).unwrap_or_else(Utc::now);

        let mut conversation = CanonicalConversation::new(id, Agent::Cursor, stamp);
        if let Some(updated) = updated {
            conversation.updated_at = updated.max(stamp);
        }
        conversation.title = composer
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.trim().is_empty())
            .map(String::from);
        conversation.messages = self.load_messages(&conn, id, &composer);

        let (files, folders) = composer_context(&composer);
        conversation.files.extend(files);
        conversation.folders.extend(folders);

        let mut conversation = conversation.finish();
        if conversation.title.is_none() {
            conversation.title = conversation
                .messages
                .iter()
                .find(|m| m.role == Role::User && !m.text.trim().is_empty())
                .map(|m| truncate_title(&m.text));
        }

        let all_files: Vec<String> = conversation.files.iter().cloned().collect();
        conversation.project_path =
            infer_workspace_root(&all_files).map(|p| p.to_string_lossy().to_string());

        if let Some(version) = composer.get("_v") {
            conversation.metadata.insert("version".into(), version.clone());
        }
        for key in ["status", "unifiedMode", "isAgentic"] {
            if let Some(v) = composer.get(key) {
                conversation.metadata.insert(key.into(), v.clone());
            }
        }

        Ok(Some(conversation))
    }

    /// Reads only the composer blob; bubbles are never resolved here
    fn get_conversation_summary(&self, id: &str) -> Result<Option<ConversationSummary>> {
        if !self.is_available() {
            return Ok(None);
        }

        let conn = self.open_db()?;
        let Some(composer) = self.load_composer(&conn, id)? else {
            return Ok(None);
        };

        Ok(Some(summarize(id, &composer)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::kv::testing::write_kv;
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn legacy_composer() -> String {
        json!({
            "composerId": "legacy-1",
            "name": "Refactor loader",
            "createdAt": 1_714_000_000_000i64,
            "lastUpdatedAt": 1_714_000_600_000i64,
            "conversation": [
                {"type": 1, "bubbleId": "b1", "text": "Please refactor the loader",
                 "relevantFiles": ["/work/app/src/loader.ts"]},
                {"type": 2, "bubbleId": "b2", "text": "Done.",
                 "codeBlocks": [{"languageId": "typescript", "content": "export {}"}]}
            ],
            "context": {"folderSelections": [{"relativeWorkspacePath": "src"}]}
        })
        .to_string()
    }

    fn modern_composer() -> String {
        json!({
            "_v": 3,
            "composerId": "modern-1",
            "createdAt": 1_714_100_000_000i64,
            "lastUpdatedAt": 1_714_100_900_000i64,
            "fullConversationHeadersOnly": [
                {"bubbleId": "m1", "type": 1},
                {"bubbleId": "m2", "type": 2},
                {"bubbleId": "gone", "type": 2}
            ],
            "context": {"fileSelections": [{"uri": {"fsPath": "/work/app/README.md"}}]},
            "latestConversationSummary": {"summary": {"summary": "Wrote the README"}}
        })
        .to_string()
    }

    fn fixture() -> (TempDir, CursorReader) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.vscdb");
        write_kv(
            &path,
            TABLE,
            &[
                ("composerData:legacy-1", legacy_composer()),
                ("composerData:modern-1", modern_composer()),
                (
                    "bubbleId:modern-1:m1",
                    json!({"text": "Write a README", "createdAt": "2024-04-26T03:00:00Z"}).to_string(),
                ),
                (
                    "bubbleId:modern-1:m2",
                    json!({"type": 2, "text": "Here it is", "relevantFiles": ["/work/app/README.md"]})
                        .to_string(),
                ),
            ],
        );
        (temp, CursorReader::new(Some(path)))
    }

    #[test]
    fn test_lists_composer_ids() {
        let (_temp, reader) = fixture();
        assert!(reader.is_available());
        let ids = reader.get_conversation_ids(None).unwrap();
        assert_eq!(ids, vec!["legacy-1", "modern-1"]);
    }

    #[test]
    fn test_legacy_inline_conversation() {
        let (_temp, reader) = fixture();
        let c = reader.get_conversation("legacy-1").unwrap().unwrap();
        assert_eq!(c.source, Agent::Cursor);
        assert_eq!(c.title.as_deref(), Some("Refactor loader"));
        assert_eq!(c.messages.len(), 2);
        assert_eq!(c.messages[0].role, Role::User);
        assert_eq!(c.messages[1].role, Role::Assistant);
        assert_eq!(c.messages[1].code_blocks[0].language.as_deref(), Some("typescript"));
        assert!(c.files.contains("/work/app/src/loader.ts"));
        assert!(c.folders.contains("src"));
        assert!(c.updated_at > c.created_at);
    }

    #[test]
    fn test_modern_resolves_headers_and_skips_missing_bubbles() {
        let (_temp, reader) = fixture();
        let c = reader.get_conversation("modern-1").unwrap().unwrap();
        assert_eq!(c.messages.len(), 2);
        // role taken from header when bubble lacks `type`
        assert_eq!(c.messages[0].role, Role::User);
        assert_eq!(c.messages[0].text, "Write a README");
        assert_eq!(c.title.as_deref(), Some("Write a README"));
        assert!(c.files.contains("/work/app/README.md"));
        assert_eq!(c.metadata.get("version"), Some(&json!(3)));
    }

    #[test]
    fn test_summary_skips_bubble_resolution() {
        let (_temp, reader) = fixture();
        let summary = reader.get_conversation_summary("modern-1").unwrap().unwrap();
        assert_eq!(summary.summary.as_deref(), Some("Wrote the README"));
        // only composer-level context, bubble files are not consulted
        assert_eq!(summary.relevant_files, vec!["/work/app/README.md"]);

        let legacy = reader.get_conversation_summary("legacy-1").unwrap().unwrap();
        assert_eq!(legacy.relevant_files, vec!["/work/app/src/loader.ts"]);
        assert_eq!(legacy.attached_folders, vec!["src"]);
    }

    #[test]
    fn test_unknown_id_and_missing_db() {
        let (_temp, reader) = fixture();
        assert!(reader.get_conversation("nope").unwrap().is_none());

        let missing = CursorReader::new(Some(PathBuf::from("/nonexistent/state.vscdb")));
        assert!(!missing.is_available());
        assert!(missing.get_conversation_ids(None).unwrap().is_empty());
        assert!(missing.get_conversation("x").unwrap().is_none());
    }

    #[test]
    fn test_project_filter_uses_common_ancestor() {
        let (_temp, reader) = fixture();
        let ids = reader.get_conversation_ids(Some("/work/app")).unwrap();
        assert_eq!(ids, vec!["legacy-1", "modern-1"]);
        assert!(reader.get_conversation_ids(Some("/other")).unwrap().is_empty());
    }
}
