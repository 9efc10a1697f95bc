//! session-end: enrich a conversation from its source and store the summary

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{resolve_for_files, HookEvent, HookOutcome, HookPayload};
use crate::reader::{ConversationSummary, ReaderRegistry};
use crate::store::{ConversationUpdate, LinkStore};
use crate::util::{project_name, relativize, to_forward_slashes};

/// Ask the readers for a summary of `id`, giving up after `timeout`.
///
/// Readers do blocking file and SQLite I/O; the lookup runs on a blocking
/// task so a wedged source can be abandoned. Any failure is "no summary".
pub fn fetch_summary(
    registry: Arc<ReaderRegistry>,
    id: String,
    timeout: Duration,
) -> Option<ConversationSummary> {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            debug!("could not start summary runtime: {e}");
            return None;
        }
    };

    let lookup_id = id.clone();
    let result = runtime.block_on(async move {
        tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || registry.find_summary(&lookup_id)),
        )
        .await
    });
    // Do not wait on a lookup that outlived the time box
    runtime.shutdown_background();

    match result {
        Ok(Ok(summary)) => {
            debug!(%id, found = summary.is_some(), "summary lookup finished");
            summary
        }
        Ok(Err(e)) => {
            debug!(%id, "summary lookup failed: {e}");
            None
        }
        Err(_) => {
            debug!(%id, timeout_ms = timeout.as_millis() as u64, "summary lookup timed out");
            None
        }
    }
}

/// Flattened text searched by keyword queries
fn search_text(parts: &[Option<&str>]) -> Option<String> {
    let text = parts
        .iter()
        .flatten()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

/// Record the end of a conversation with whatever enrichment was found.
///
/// Files learned by earlier file-touched events are never dropped: the
/// captured set is untouched here and text fields are coalesced.
pub fn handle_session_end(
    store: &mut LinkStore,
    payload: &HookPayload,
    summary: Option<ConversationSummary>,
    cwd: &Path,
    now: DateTime<Utc>,
) -> Result<HookOutcome> {
    let event = HookEvent::SessionEnd;
    let Some(id) = payload.conversation_id.as_deref() else {
        return Ok(HookOutcome::Skipped {
            event,
            reason: "no conversation id".into(),
        });
    };

    let prior = store.get_conversation(id)?;
    let summary_files = summary
        .as_ref()
        .map(|s| s.relevant_files.clone())
        .unwrap_or_default();

    let root = resolve_for_files(payload.workspace_root.as_deref(), &summary_files, cwd)
        .or_else(|| {
            summary
                .as_ref()
                .and_then(|s| s.project_path.as_deref())
                .map(PathBuf::from)
        })
        .or_else(|| prior.as_ref().map(|p| PathBuf::from(&p.workspace_root)))
        .unwrap_or_else(|| cwd.to_path_buf());
    debug!(%id, root = %root.display(), enriched = summary.is_some(), "session end");

    let relativize_all =
        |files: &[String]| -> Vec<String> { files.iter().map(|f| relativize(f, &root)).collect() };

    let agent = payload
        .agent
        .clone()
        .or_else(|| summary.as_ref().map(|s| s.source.as_str().to_string()));

    let mut update = ConversationUpdate::new(
        id,
        agent.as_deref(),
        to_forward_slashes(&root.to_string_lossy()),
        project_name(&root),
        now,
    );

    if let Some(summary) = &summary {
        update.relevant_files = Some(relativize_all(&summary.relevant_files));
        update.attached_folders = Some(relativize_all(&summary.attached_folders));
        update.ai_summary = summary.summary.clone();
        update.title = summary.title.clone();
    }
    update.title = update.title.or_else(|| payload.title.clone());
    update.summary = payload.summary.clone();
    update.searchable_text = search_text(&[
        update.title.as_deref(),
        update.summary.as_deref(),
        update.ai_summary.as_deref(),
    ]);
    update.last_hook_event = Some(event.as_str().to_string());

    let stored = store.upsert_conversation(update)?;
    Ok(HookOutcome::Conversation {
        event,
        id: stored.id,
        captured_files: stored.captured_files.len(),
    })
}
