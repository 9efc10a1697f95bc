//! Claude Code reader
//!
//! Extracts conversation history from Claude Code CLI sessions.
//! Data format: JSONL files in ~/.claude/projects/<dashed_project_path>/<session_id>.jsonl
//!   - the directory name is the project path with every separator replaced by '-'
//!   - message content is a string or a list of typed blocks; only `text`
//!     blocks contribute to message text

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::{
    modified_time, tool_input_files, truncate_title, Agent, CanonicalConversation,
    CanonicalMessage, ConversationReader, Role,
};
use crate::util::{dashed_project_dir, parse_timestamp};

pub struct ClaudeCodeReader {
    base_path: PathBuf,
}

impl ClaudeCodeReader {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".claude/projects")
        });
        Self { base_path }
    }

    /// Session files, each paired with its project directory name
    fn session_files(&self) -> Vec<(String, PathBuf)> {
        WalkDir::new(&self.base_path)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().map(|x| x == "jsonl").unwrap_or(false))
            .filter_map(|e| {
                let project_dir = e
                    .path()
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())?
                    .to_string();
                Some((project_dir, e.into_path()))
            })
            .collect()
    }

    fn find_session_file(&self, id: &str) -> Option<PathBuf> {
        let file_name = format!("{}.jsonl", id);
        self.session_files()
            .into_iter()
            .map(|(_, path)| path)
            .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(file_name.as_str()))
    }

    fn parse_session(&self, id: &str, path: &Path) -> Result<CanonicalConversation> {
        let file = File::open(path).context("Failed to open session file")?;
        let reader = BufReader::new(file);

        let mut messages = vec![];
        let mut project_path: Option<String> = None;
        let mut summary_title: Option<String> = None;
        let mut git_branch: Option<String> = None;
        let mut version: Option<String> = None;
        let mut first_ts: Option<DateTime<Utc>> = None;
        let mut last_ts: Option<DateTime<Utc>> = None;
        let mut model_counts: HashMap<String, usize> = HashMap::new();

        for (line_number, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    debug!(path = %path.display(), line_number, "unreadable line: {e}");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let json: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    debug!(path = %path.display(), line_number, "skipping malformed line: {e}");
                    continue;
                }
            };

            let entry_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");

            // Skip queue operations
            if entry_type == "queue-operation" {
                continue;
            }

            if entry_type == "summary" {
                if summary_title.is_none() {
                    summary_title = json
                        .get("summary")
                        .and_then(|s| s.as_str())
                        .map(truncate_title);
                }
                continue;
            }

            // Extract project path from cwd
            if project_path.is_none() {
                project_path = json.get("cwd").and_then(|v| v.as_str()).map(String::from);
            }
            if git_branch.is_none() {
                git_branch = json
                    .get("gitBranch")
                    .and_then(|v| v.as_str())
                    .filter(|b| !b.is_empty())
                    .map(String::from);
            }
            if version.is_none() {
                version = json.get("version").and_then(|v| v.as_str()).map(String::from);
            }

            let timestamp = json.get("timestamp").and_then(parse_timestamp);
            if let Some(ts) = timestamp {
                if first_ts.is_none() {
                    first_ts = Some(ts);
                }
                last_ts = Some(ts);
            }

            let Some(message) = json.get("message") else {
                continue;
            };

            let role = message
                .get("role")
                .and_then(|v| v.as_str())
                .or(Some(entry_type))
                .and_then(Role::parse);
            let Some(role) = role else {
                continue;
            };

            if let Some(model) = message.get("model").and_then(|v| v.as_str()) {
                *model_counts.entry(model.to_string()).or_insert(0) += 1;
            }

            let (text, files) = match message.get("content") {
                Some(Value::String(s)) => (s.clone(), vec![]),
                Some(Value::Array(blocks)) => content_blocks(blocks),
                _ => (String::new(), vec![]),
            };

            // Pure tool-result turns carry neither text nor file references
            if text.trim().is_empty() && files.is_empty() {
                continue;
            }

            let mut msg = CanonicalMessage::new(role, text);
            msg.timestamp = timestamp;
            msg.files = files;
            messages.push(msg);
        }

        let fallback = modified_time(path).unwrap_or_else(Utc::now);
        let mut conversation =
            CanonicalConversation::new(id, Agent::ClaudeCode, first_ts.unwrap_or(fallback));
        conversation.updated_at = last_ts.unwrap_or(conversation.created_at);
        conversation.project_path = project_path;
        conversation.messages = messages;

        let mut conversation = conversation.finish();
        conversation.title = summary_title.or_else(|| {
            conversation
                .messages
                .iter()
                .find(|m| m.role == Role::User && !m.text.trim().is_empty())
                .map(|m| truncate_title(&m.text))
        });

        let primary_model = model_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(model, _)| model);
        if let Some(model) = primary_model {
            conversation.metadata.insert("model".into(), Value::from(model));
        }
        if let Some(branch) = git_branch {
            conversation.metadata.insert("gitBranch".into(), Value::from(branch));
        }
        if let Some(version) = version {
            conversation.metadata.insert("version".into(), Value::from(version));
        }
        conversation.metadata.insert(
            "sourcePath".into(),
            Value::from(path.to_string_lossy().to_string()),
        );

        Ok(conversation)
    }
}

/// Text of `text` blocks plus file paths named by `tool_use` inputs
fn content_blocks(blocks: &[Value]) -> (String, Vec<String>) {
    let mut texts = vec![];
    let mut files = vec![];
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    texts.push(text);
                }
            }
            Some("tool_use") => {
                if let Some(input) = block.get("input") {
                    files.extend(tool_input_files(input));
                }
            }
            _ => {}
        }
    }
    files.sort();
    files.dedup();
    (texts.join("\n"), files)
}

impl ConversationReader for ClaudeCodeReader {
    fn agent(&self) -> Agent {
        Agent::ClaudeCode
    }

    fn description(&self) -> &str {
        "Claude Code CLI transcripts"
    }

    fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn get_conversation_ids(&self, project: Option<&str>) -> Result<Vec<String>> {
        if !self.is_available() {
            return Ok(vec![]);
        }

        let wanted_dir = project.map(dashed_project_dir);
        let mut ids: Vec<String> = self
            .session_files()
            .into_iter()
            .filter(|(dir, _)| wanted_dir.as_deref().map_or(true, |w| dir == w))
            .filter_map(|(_, path)| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(String::from)
            })
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn get_conversation(&self, id: &str) -> Result<Option<CanonicalConversation>> {
        if !self.is_available() {
            return Ok(None);
        }
        match self.find_session_file(id) {
            Some(path) => self.parse_session(id, &path).map(Some),
            None => Ok(None),
        }
    }
}
