//! Cline reader
//!
//! Extracts task history from the Cline VS Code extension.
//! Data format: one directory per task under
//! <config>/Code/User/globalStorage/saoudrizwan.claude-dev/tasks/<task_id>/
//!   - ui_messages.json: what the webview showed, `partial` entries are still streaming
//!   - api_conversation_history.json: what was sent to the model

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use super::{
    matches_project, modified_time, read_json_file, tool_input_files, truncate_title, Agent,
    CanonicalConversation, CanonicalMessage, ConversationReader, Role,
};
use crate::util::parse_timestamp;

const UI_FILE: &str = "ui_messages.json";
const API_FILE: &str = "api_conversation_history.json";

/// Longest substring accepted as a recovered file path
const MAX_RECOVERED_PATH_LEN: usize = 200;

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:[A-Za-z]:[\\/]|\.{1,2}/|/)?(?:[\w.\-]+[\\/])+[\w.\-]+\.[A-Za-z0-9]{1,10}\b")
            .expect("valid path regex")
    })
}

fn cwd_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Current Working Directory \(([^)\n]+)\)").expect("valid cwd regex")
    })
}

fn environment_details_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<environment_details>.*?</environment_details>")
            .expect("valid environment regex")
    })
}

/// Path-shaped substrings of free text, skipping URLs and overlong matches
pub(crate) fn recover_paths(text: &str) -> Vec<String> {
    let mut paths = vec![];
    for m in path_pattern().find_iter(text) {
        let candidate = m.as_str();
        if candidate.len() > MAX_RECOVERED_PATH_LEN {
            continue;
        }
        let preceding = text[..m.start()].chars().last();
        if matches!(preceding, Some('/') | Some(':') | Some('@')) {
            continue;
        }
        paths.push(candidate.to_string());
    }
    paths.sort();
    paths.dedup();
    paths
}

pub struct ClineReader {
    base_path: PathBuf,
}

impl ClineReader {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_default()
                .join("Code/User/globalStorage/saoudrizwan.claude-dev/tasks")
        });
        Self { base_path }
    }

    fn task_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = vec![];
        for entry in std::fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.is_dir() && (path.join(UI_FILE).exists() || path.join(API_FILE).exists()) {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn parse_task(&self, id: &str, dir: &Path) -> Result<CanonicalConversation> {
        let ui: Vec<Value> = read_json_array(&dir.join(UI_FILE));
        let api: Vec<Value> = read_json_array(&dir.join(API_FILE));

        // Entries still being streamed are incomplete duplicates of a later entry
        let ui: Vec<Value> = ui
            .into_iter()
            .filter(|e| !e.get("partial").and_then(|p| p.as_bool()).unwrap_or(false))
            .collect();

        let timestamps: Vec<DateTime<Utc>> = ui
            .iter()
            .filter_map(|e| e.get("ts").and_then(parse_timestamp))
            .collect();
        let fallback = modified_time(dir).unwrap_or_else(Utc::now);
        let created = timestamps.iter().min().copied().unwrap_or(fallback);
        let updated = timestamps.iter().max().copied().unwrap_or(created);

        let mut conversation = CanonicalConversation::new(id, Agent::Cline, created);
        conversation.updated_at = updated;

        let task_text = ui
            .iter()
            .find(|e| e.get("say").and_then(|s| s.as_str()) == Some("task"))
            .and_then(|e| e.get("text").and_then(|t| t.as_str()));
        conversation.title = task_text.map(truncate_title);

        let mut ui_files = vec![];
        for entry in &ui {
            ui_files.extend(ui_entry_files(entry));
        }

        conversation.messages = if api.is_empty() {
            ui.iter().filter_map(ui_entry_to_message).collect()
        } else {
            api.iter().filter_map(api_entry_to_message).collect()
        };
        conversation.files.extend(ui_files);

        conversation.project_path = api
            .iter()
            .chain(ui.iter())
            .find_map(find_cwd);

        let mut conversation = conversation.finish();
        if conversation.title.is_none() {
            conversation.title = conversation
                .messages
                .iter()
                .find(|m| m.role == Role::User && !m.text.trim().is_empty())
                .map(|m| truncate_title(&m.text));
        }
        conversation
            .metadata
            .insert("uiEntries".into(), Value::from(ui.len()));
        Ok(conversation)
    }
}

/// Parse a JSON array file; anything else (missing, malformed) is empty
fn read_json_array(path: &Path) -> Vec<Value> {
    match read_json_file(path) {
        Ok(Some(Value::Array(items))) => items,
        Ok(_) => vec![],
        Err(e) => {
            debug!(path = %path.display(), "unreadable transcript: {e:#}");
            vec![]
        }
    }
}

/// Cline reports the workspace in the environment details it sends along
fn find_cwd(entry: &Value) -> Option<String> {
    let mut texts = vec![];
    match entry.get("content").or_else(|| entry.get("text")) {
        Some(Value::String(s)) => texts.push(s.as_str()),
        Some(Value::Array(blocks)) => {
            texts.extend(blocks.iter().filter_map(|b| b.get("text").and_then(|t| t.as_str())))
        }
        _ => {}
    }
    texts.into_iter().find_map(|t| {
        cwd_pattern()
            .captures(t)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

fn strip_environment_details(text: &str) -> String {
    environment_details_pattern()
        .replace_all(text, "")
        .trim()
        .to_string()
}

/// Text of a tool_result block (string or nested text blocks)
fn tool_result_text(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn api_entry_to_message(entry: &Value) -> Option<CanonicalMessage> {
    let role = entry
        .get("role")
        .and_then(|r| r.as_str())
        .and_then(Role::parse)?;

    let mut texts = vec![];
    let mut files = vec![];
    match entry.get("content") {
        Some(Value::String(s)) => texts.push(strip_environment_details(s)),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            texts.push(strip_environment_details(text));
                        }
                    }
                    Some("tool_use") => {
                        if let Some(input) = block.get("input") {
                            files.extend(tool_input_files(input));
                        }
                    }
                    Some("tool_result") => {
                        files.extend(recover_paths(&tool_result_text(block)));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    let text = texts
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    files.sort();
    files.dedup();
    if text.is_empty() && files.is_empty() {
        return None;
    }

    let mut msg = CanonicalMessage::new(role, text);
    msg.timestamp = entry.get("ts").and_then(parse_timestamp);
    msg.files = files;
    Some(msg)
}

fn ui_entry_to_message(entry: &Value) -> Option<CanonicalMessage> {
    let role = match (
        entry.get("say").and_then(|s| s.as_str()),
        entry.get("ask").and_then(|s| s.as_str()),
    ) {
        (Some("task"), _) | (Some("user_feedback"), _) => Role::User,
        (Some("text"), _) | (Some("completion_result"), _) | (_, Some("followup")) => {
            Role::Assistant
        }
        _ => return None,
    };
    let text = entry.get("text").and_then(|t| t.as_str())?.trim();
    if text.is_empty() {
        return None;
    }
    let mut msg = CanonicalMessage::new(role, text);
    msg.timestamp = entry.get("ts").and_then(parse_timestamp);
    Some(msg)
}

/// Tool entries carry a JSON payload naming the file they touched
fn ui_entry_files(entry: &Value) -> Vec<String> {
    let is_tool = entry.get("say").and_then(|s| s.as_str()) == Some("tool")
        || entry.get("ask").and_then(|s| s.as_str()) == Some("tool");
    if !is_tool {
        return vec![];
    }
    entry
        .get("text")
        .and_then(|t| t.as_str())
        .and_then(|t| serde_json::from_str::<Value>(t).ok())
        .map(|payload| tool_input_files(&payload))
        .unwrap_or_default()
}

impl ConversationReader for ClineReader {
    fn agent(&self) -> Agent {
        Agent::Cline
    }

    fn description(&self) -> &str {
        "Cline VS Code extension tasks"
    }

    fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn get_conversation_ids(&self, project: Option<&str>) -> Result<Vec<String>> {
        if !self.is_available() {
            return Ok(vec![]);
        }

        let mut ids = vec![];
        for dir in self.task_dirs()? {
            let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            if let Some(project) = project {
                let cwd = read_json_array(&dir.join(API_FILE))
                    .iter()
                    .chain(read_json_array(&dir.join(UI_FILE)).iter())
                    .find_map(find_cwd);
                if !matches_project(cwd.as_deref(), project) {
                    continue;
                }
            }
            ids.push(id);
        }
        Ok(ids)
    }

    fn get_conversation(&self, id: &str) -> Result<Option<CanonicalConversation>> {
        if !self.is_available() || id.contains(['/', '\\']) {
            return Ok(None);
        }
        let dir = self.base_path.join(id);
        if !dir.join(UI_FILE).exists() && !dir.join(API_FILE).exists() {
            return Ok(None);
        }
        self.parse_task(id, &dir).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_task(base: &Path, id: &str, ui: Value, api: Option<Value>) {
        let dir = base.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(UI_FILE), ui.to_string()).unwrap();
        if let Some(api) = api {
            std::fs::write(dir.join(API_FILE), api.to_string()).unwrap();
        }
    }

    fn fixture() -> (TempDir, ClineReader) {
        let temp = TempDir::new().unwrap();
        write_task(
            temp.path(),
            "1714000000000",
            json!([
                {"ts": 1_714_000_000_000i64, "type": "say", "say": "task", "text": "Add retry logic"},
                {"ts": 1_714_000_095_000i64, "type": "say", "say": "text", "text": "Thinking", "partial": true},
                {"ts": 1_714_000_002_000i64, "type": "ask", "ask": "tool",
                 "text": "{\"tool\":\"editedExistingFile\",\"path\":\"src/retry.ts\"}"},
                {"ts": 1_714_000_090_000i64, "type": "say", "say": "completion_result", "text": "Done"}
            ]),
            Some(json!([
                {"role": "user", "content": [
                    {"type": "text", "text": "<task>Add retry logic</task>"},
                    {"type": "text", "text": "<environment_details>\n# Current Working Directory (/work/svc) Files\n</environment_details>"}
                ]},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "I'll edit the client."},
                    {"type": "tool_use", "name": "replace_in_file",
                     "input": {"path": "src/client.ts", "diff": "..."}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1",
                     "content": [{"type": "text", "text": "Changes applied to src/client.ts and lib/util/http.ts. See https://example.com/docs/guide.html"}]}
                ]}
            ])),
        );
        write_task(
            temp.path(),
            "1714100000000",
            json!([
                {"ts": 1_714_100_000_000i64, "type": "say", "say": "task", "text": "UI only task"},
                {"ts": 1_714_100_005_000i64, "type": "say", "say": "text", "text": "Answer"}
            ]),
            None,
        );
        let reader = ClineReader::new(Some(temp.path().to_path_buf()));
        (temp, reader)
    }

    #[test]
    fn test_lists_tasks_and_filters_by_cwd() {
        let (_temp, reader) = fixture();
        assert_eq!(
            reader.get_conversation_ids(None).unwrap(),
            vec!["1714000000000", "1714100000000"]
        );
        assert_eq!(
            reader.get_conversation_ids(Some("/work/svc")).unwrap(),
            vec!["1714000000000"]
        );
    }

    #[test]
    fn test_api_transcript_drives_messages() {
        let (_temp, reader) = fixture();
        let c = reader.get_conversation("1714000000000").unwrap().unwrap();
        assert_eq!(c.source, Agent::Cline);
        assert_eq!(c.title.as_deref(), Some("Add retry logic"));
        assert_eq!(c.project_path.as_deref(), Some("/work/svc"));
        assert_eq!(c.messages[0].text, "<task>Add retry logic</task>");
        assert!(c.files.contains("src/client.ts"));
        assert!(c.files.contains("lib/util/http.ts"));
        assert!(c.files.contains("src/retry.ts"));
        assert!(!c.files.iter().any(|f| f.contains("example.com")));
        assert_eq!(c.metadata.get("uiEntries"), Some(&json!(3)));
    }

    #[test]
    fn test_partial_entries_are_dropped_from_time_range() {
        let (_temp, reader) = fixture();
        let c = reader.get_conversation("1714000000000").unwrap().unwrap();
        assert_eq!(c.created_at.timestamp_millis(), 1_714_000_000_000);
        assert_eq!(c.updated_at.timestamp_millis(), 1_714_000_090_000);
    }

    #[test]
    fn test_ui_only_task_falls_back_to_ui_messages() {
        let (_temp, reader) = fixture();
        let c = reader.get_conversation("1714100000000").unwrap().unwrap();
        assert_eq!(c.messages.len(), 2);
        assert_eq!(c.messages[0].role, Role::User);
        assert_eq!(c.messages[1].role, Role::Assistant);
        assert!(c.project_path.is_none());
    }

    #[test]
    fn test_recover_paths_bounds_and_urls() {
        let long = format!("{}/x.rs", "a".repeat(300));
        let text = format!("edited ./src/a.rs and C:\\proj\\b.ts, not {} or http://h.io/p/q.js", long);
        let found = recover_paths(&text);
        assert!(found.contains(&"./src/a.rs".to_string()));
        assert!(found.contains(&"C:\\proj\\b.ts".to_string()));
        assert!(!found.iter().any(|p| p.len() > MAX_RECOVERED_PATH_LEN));
        assert!(!found.iter().any(|p| p.contains("h.io")));
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let (_temp, reader) = fixture();
        assert!(reader.get_conversation("../escape").unwrap().is_none());
        assert!(reader.get_conversation("missing").unwrap().is_none());
    }
}
