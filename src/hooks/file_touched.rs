//! file-touched: remember that a conversation edited a file

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::debug;

use super::{resolve_for_file, HookEvent, HookOutcome, HookPayload};
use crate::store::{ConversationUpdate, LinkStore};
use crate::util::{project_name, relativize, to_forward_slashes};

/// Add the payload's file to the conversation's captured files.
///
/// Replaying the same event converges to the same stored set.
pub fn handle_file_touched(
    store: &mut LinkStore,
    payload: &HookPayload,
    cwd: &Path,
    now: DateTime<Utc>,
) -> Result<HookOutcome> {
    let event = HookEvent::FileTouched;
    let Some(id) = payload.conversation_id.as_deref() else {
        return Ok(HookOutcome::Skipped {
            event,
            reason: "no conversation id".into(),
        });
    };
    let Some(file) = payload.file_path.as_deref().filter(|f| !f.trim().is_empty()) else {
        return Ok(HookOutcome::Skipped {
            event,
            reason: "no file path".into(),
        });
    };

    let root = resolve_for_file(payload.workspace_root.as_deref(), Some(file), cwd);
    let relative = relativize(file.trim(), &root);
    debug!(%id, file = %relative, root = %root.display(), "file touched");

    let mut update = ConversationUpdate::new(
        id,
        payload.agent.as_deref(),
        to_forward_slashes(&root.to_string_lossy()),
        project_name(&root),
        now,
    );
    update.captured_files = vec![relative];
    update.last_hook_event = Some(event.as_str().to_string());

    let stored = store.upsert_conversation(update)?;
    Ok(HookOutcome::Conversation {
        event,
        id: stored.id,
        captured_files: stored.captured_files.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: Option<&str>, file: Option<&str>) -> HookPayload {
        HookPayload {
            conversation_id: id.map(String::from),
            file_path: file.map(String::from),
            workspace_root: Some("/work/app".into()),
            agent: Some("cursor".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut store = LinkStore::open_in_memory().unwrap();
        let cwd = Path::new("/work/app");
        let event = payload(Some("c1"), Some("/work/app/src/a.ts"));

        for _ in 0..3 {
            handle_file_touched(&mut store, &event, cwd, Utc::now()).unwrap();
        }
        let stored = store.get_conversation("c1").unwrap().unwrap();
        assert_eq!(stored.captured_files, vec!["src/a.ts"]);
        assert_eq!(stored.workspace_root, "/work/app");
        assert_eq!(stored.project_name, "app");
        assert_eq!(stored.agent, "cursor");
    }

    #[test]
    fn test_windows_paths_relativize() {
        let mut store = LinkStore::open_in_memory().unwrap();
        let mut event = payload(Some("c1"), Some("C:\\proj\\src\\Main.cs"));
        event.workspace_root = Some("C:/proj".into());
        handle_file_touched(&mut store, &event, Path::new("/"), Utc::now()).unwrap();

        let stored = store.get_conversation("c1").unwrap().unwrap();
        assert_eq!(stored.captured_files, vec!["src/Main.cs"]);
    }

    #[test]
    fn test_missing_fields_skip() {
        let mut store = LinkStore::open_in_memory().unwrap();
        let cwd = Path::new("/");
        let outcome = handle_file_touched(&mut store, &payload(None, Some("a.ts")), cwd, Utc::now())
            .unwrap();
        assert!(matches!(outcome, HookOutcome::Skipped { .. }));
        let outcome =
            handle_file_touched(&mut store, &payload(Some("c1"), None), cwd, Utc::now()).unwrap();
        assert!(matches!(outcome, HookOutcome::Skipped { .. }));
        assert_eq!(store.stats().unwrap().conversations, 0);
    }
}
