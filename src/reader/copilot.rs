//! GitHub Copilot Chat reader
//!
//! Data format: one JSON file per chat session at
//! <config>/Code/User/workspaceStorage/<hash>/chatSessions/<session>.json
//!
//! Each session holds `requests`, every request a prompt/response pair.
//! Depending on the extension version either side is a bare string or an
//! object wrapping the text (`{"text": ..}`, `{"value": ..}`,
//! `{"content": {"value": ..}}`); responses may also be a list of parts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::cursor_workspace::workspace_folder;
use super::{
    collect_strings_by_key, decode_file_uri, matches_project, modified_time, truncate_title,
    Agent, CanonicalConversation, CanonicalMessage, ConversationReader, Role,
};
use crate::util::ms_to_datetime;

/// Keys under which attached or referenced files carry their path
const REFERENCE_KEYS: &[&str] = &["fsPath"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSession {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    custom_title: Option<String>,
    #[serde(default)]
    creation_date: Option<i64>,
    #[serde(default)]
    last_message_date: Option<i64>,
    #[serde(default)]
    requests: Vec<ChatRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    #[serde(default)]
    message: Option<TextOrWrapped>,
    #[serde(default)]
    response: Option<ResponseContent>,
    #[serde(default)]
    variable_data: Option<Value>,
    #[serde(default)]
    content_references: Option<Value>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextOrWrapped {
    Bare(String),
    Wrapped(WrappedText),
}

#[derive(Debug, Default, Deserialize)]
struct WrappedText {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    content: Option<Box<TextOrWrapped>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseContent {
    Bare(String),
    Parts(Vec<TextOrWrapped>),
    Wrapped(WrappedText),
}

impl TextOrWrapped {
    fn into_text(self) -> String {
        match self {
            TextOrWrapped::Bare(s) => s,
            TextOrWrapped::Wrapped(w) => w.into_text(),
        }
    }
}

impl WrappedText {
    fn into_text(self) -> String {
        self.text
            .or(self.value)
            .or_else(|| self.content.map(|c| c.into_text()))
            .unwrap_or_default()
    }
}

impl ResponseContent {
    fn into_text(self) -> String {
        match self {
            ResponseContent::Bare(s) => s,
            ResponseContent::Wrapped(w) => w.into_text(),
            ResponseContent::Parts(parts) => parts
                .into_iter()
                .map(TextOrWrapped::into_text)
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// File paths referenced by a request's attachments
fn request_files(request: &ChatRequest) -> Vec<String> {
    let mut files = vec![];
    for value in [&request.variable_data, &request.content_references]
        .into_iter()
        .flatten()
    {
        collect_strings_by_key(value, REFERENCE_KEYS, &mut files);
    }
    let mut files: Vec<String> = files
        .into_iter()
        .map(|f| {
            if f.starts_with("file://") {
                decode_file_uri(&f)
            } else {
                f
            }
        })
        .collect();
    files.sort();
    files.dedup();
    files
}

pub struct CopilotReader {
    base_path: PathBuf,
}

impl CopilotReader {
    pub fn new(custom_path: Option<PathBuf>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_default()
                .join("Code/User/workspaceStorage")
        });
        Self { base_path }
    }

    fn session_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = format!(
            "{}/*/chatSessions/*.json",
            glob::Pattern::escape(&self.base_path.to_string_lossy())
        );
        let mut files = vec![];
        for entry in glob::glob(&pattern).context("Invalid chat session glob")? {
            match entry {
                Ok(path) => files.push(path),
                Err(e) => debug!("skipping unreadable session entry: {e}"),
            }
        }
        files.sort();
        Ok(files)
    }

    /// Workspace folder a session file belongs to
    fn session_folder(path: &Path) -> Option<String> {
        path.parent()
            .and_then(|chat_dir| chat_dir.parent())
            .and_then(workspace_folder)
    }

    fn load_session(path: &Path) -> Result<ChatSession> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn session_id(path: &Path, session: &ChatSession) -> String {
        session.session_id.clone().unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string()
        })
    }

    fn parse_session(path: &Path, session: ChatSession) -> CanonicalConversation {
        let id = Self::session_id(path, &session);
        let fallback = modified_time(path).unwrap_or_else(Utc::now);
        let created = session
            .creation_date
            .and_then(ms_to_datetime)
            .unwrap_or(fallback);
        let updated: DateTime<Utc> = session
            .last_message_date
            .and_then(ms_to_datetime)
            .unwrap_or(created)
            .max(created);

        let mut conversation = CanonicalConversation::new(id, Agent::Copilot, created);
        conversation.updated_at = updated;
        conversation.project_path = Self::session_folder(path);
        conversation.title = session
            .custom_title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(truncate_title);

        for request in session.requests {
            let files = request_files(&request);
            let timestamp = request.timestamp.and_then(ms_to_datetime);

            let prompt = request.message.map(TextOrWrapped::into_text).unwrap_or_default();
            if !prompt.trim().is_empty() || !files.is_empty() {
                let mut msg = CanonicalMessage::new(Role::User, prompt.trim());
                msg.timestamp = timestamp;
                msg.files = files;
                conversation.messages.push(msg);
            }

            let reply = request.response.map(ResponseContent::into_text).unwrap_or_default();
            if !reply.trim().is_empty() {
                let mut msg = CanonicalMessage::new(Role::Assistant, reply.trim());
                msg.timestamp = timestamp;
                conversation.messages.push(msg);
            }
        }

        if conversation.title.is_none() {
            conversation.title = conversation
                .messages
                .iter()
                .find(|m| m.role == Role::User && !m.text.is_empty())
                .map(|m| truncate_title(&m.text));
        }
        conversation
            .metadata
            .insert("sourcePath".into(), Value::from(path.to_string_lossy().to_string()));
        conversation.finish()
    }
}

impl ConversationReader for CopilotReader {
    fn agent(&self) -> Agent {
        Agent::Copilot
    }

    fn description(&self) -> &str {
        "GitHub Copilot Chat sessions (VS Code)"
    }

    fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn get_conversation_ids(&self, project: Option<&str>) -> Result<Vec<String>> {
        if !self.is_available() {
            return Ok(vec![]);
        }

        let mut ids = vec![];
        for path in self.session_files()? {
            if let Some(project) = project {
                if !matches_project(Self::session_folder(&path).as_deref(), project) {
                    continue;
                }
            }
            match Self::load_session(&path) {
                Ok(session) => ids.push(Self::session_id(&path, &session)),
                Err(e) => debug!("skipping session: {e:#}"),
            }
        }
        Ok(ids)
    }

    fn get_conversation(&self, id: &str) -> Result<Option<CanonicalConversation>> {
        if !self.is_available() {
            return Ok(None);
        }

        for path in self.session_files()? {
            // Files are normally named after the session id; check that first
            let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(id);
            let session = match Self::load_session(&path) {
                Ok(s) => s,
                Err(e) => {
                    if stem_matches {
                        return Err(e);
                    }
                    continue;
                }
            };
            if Self::session_id(&path, &session) == id {
                return Ok(Some(Self::parse_session(&path, session)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_session(base: &Path, hash: &str, folder: Option<&str>, name: &str, body: Value) {
        let dir = base.join(hash);
        std::fs::create_dir_all(dir.join("chatSessions")).unwrap();
        if let Some(folder) = folder {
            std::fs::write(
                dir.join("workspace.json"),
                json!({ "folder": folder }).to_string(),
            )
            .unwrap();
        }
        std::fs::write(dir.join("chatSessions").join(name), body.to_string()).unwrap();
    }

    fn fixture() -> (TempDir, CopilotReader) {
        let temp = TempDir::new().unwrap();
        write_session(
            temp.path(),
            "aaa",
            Some("file:///work/web"),
            "s-1.json",
            json!({
                "version": 3,
                "sessionId": "s-1",
                "creationDate": 1_714_000_000_000i64,
                "lastMessageDate": 1_714_000_600_000i64,
                "requests": [
                    {
                        "message": {"text": "Why does the login form flicker?", "parts": []},
                        "variableData": {"variables": [
                            {"id": "file", "value": {"uri": {"fsPath": "/work/web/src/Login.tsx"}}}
                        ]},
                        "response": [
                            {"value": "The effect runs "},
                            {"kind": "inlineReference", "inlineReference": {}},
                            {"value": "on every render."}
                        ],
                        "contentReferences": [
                            {"reference": {"fsPath": "/work/web/src/hooks/useAuth.ts"}}
                        ],
                        "timestamp": 1_714_000_100_000i64
                    },
                    {
                        "message": "Fix it",
                        "response": {"content": {"value": "Added a dependency array."}},
                        "timestamp": 1_714_000_500_000i64
                    }
                ]
            }),
        );
        write_session(
            temp.path(),
            "bbb",
            None,
            "untitled.json",
            json!({
                "customTitle": "Scratch",
                "requests": [{"message": "hello", "response": "hi"}]
            }),
        );
        write_session(temp.path(), "ccc", None, "broken.json", json!("not a session"));
        let reader = CopilotReader::new(Some(temp.path().to_path_buf()));
        (temp, reader)
    }

    #[test]
    fn test_lists_sessions_and_skips_malformed() {
        let (_temp, reader) = fixture();
        assert_eq!(
            reader.get_conversation_ids(None).unwrap(),
            vec!["s-1", "untitled"]
        );
        assert_eq!(
            reader.get_conversation_ids(Some("/work/web")).unwrap(),
            vec!["s-1"]
        );
    }

    #[test]
    fn test_bare_and_wrapped_content_normalize_alike() {
        let (_temp, reader) = fixture();
        let c = reader.get_conversation("s-1").unwrap().unwrap();
        assert_eq!(c.source, Agent::Copilot);
        assert_eq!(c.project_path.as_deref(), Some("/work/web"));
        assert_eq!(c.title.as_deref(), Some("Why does the login form flicker?"));

        let texts: Vec<&str> = c.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Why does the login form flicker?",
                "The effect runs on every render.",
                "Fix it",
                "Added a dependency array.",
            ]
        );
        assert!(c.files.contains("/work/web/src/Login.tsx"));
        assert!(c.files.contains("/work/web/src/hooks/useAuth.ts"));
        assert_eq!(c.updated_at.timestamp_millis(), 1_714_000_600_000);
    }

    #[test]
    fn test_id_falls_back_to_file_stem() {
        let (_temp, reader) = fixture();
        let c = reader.get_conversation("untitled").unwrap().unwrap();
        assert_eq!(c.title.as_deref(), Some("Scratch"));
        assert_eq!(c.messages.len(), 2);
        assert_eq!(c.messages[1].role, Role::Assistant);
        assert!(reader.get_conversation("nope").unwrap().is_none());
    }
}
