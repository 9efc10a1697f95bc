//! Commit auto-linking
//!
//! Scores every conversation updated within a backward window of a commit:
//!
//!   score = 0.7 * file_overlap + 0.3 * recency
//!
//! where `file_overlap` is the share of the commit's changed files the
//! conversation referenced and `recency` decays linearly from 1.0 at the
//! commit time to 0.0 at the window edge. Candidates at or above
//! `min_score` become auto links with `confidence = score`.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::LinkingConfig;
use crate::error::TetherError;
use crate::store::{CommitRecord, ConversationRecord, LinkRecord, LinkStatus, LinkStore};
use crate::util::{days_between, normalize_for_match, recency};

pub const FILE_OVERLAP_WEIGHT: f64 = 0.7;
pub const RECENCY_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoLinkOptions {
    pub window_days: f64,
    pub min_score: f64,
}

impl Default for AutoLinkOptions {
    fn default() -> Self {
        Self {
            window_days: 14.0,
            min_score: 0.2,
        }
    }
}

impl From<&LinkingConfig> for AutoLinkOptions {
    fn from(config: &LinkingConfig) -> Self {
        Self {
            window_days: config.window_days,
            min_score: config.min_score,
        }
    }
}

impl AutoLinkOptions {
    /// Earliest update time a candidate may have. Windows too wide to
    /// represent reach back to the earliest instant chrono can hold.
    fn window_start(&self, committed_at: DateTime<Utc>) -> DateTime<Utc> {
        let ms = (self.window_days.max(0.0) * 86_400_000.0) as i64;
        Duration::try_milliseconds(ms)
            .and_then(|window| committed_at.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// One scored candidate; never persisted as such
#[derive(Debug, Clone, PartialEq)]
pub struct AutoLinkScore {
    pub conversation_id: String,
    pub score: f64,
    pub file_overlap: f64,
    pub recency: f64,
    /// Normalized paths present in both file sets
    pub matched_files: Vec<String>,
}

pub fn combined_score(file_overlap: f64, recency: f64) -> f64 {
    FILE_OVERLAP_WEIGHT * file_overlap + RECENCY_WEIGHT * recency
}

fn normalized_set<'a, I>(files: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
{
    files
        .into_iter()
        .map(|f| normalize_for_match(f))
        .filter(|f| !f.is_empty())
        .collect()
}

/// Rank `candidates` against `commit`, best first.
///
/// Conversations updated after the commit, or before the window opens, are
/// not candidates. A commit without changed files scores nothing.
pub fn score_candidates(
    commit: &CommitRecord,
    candidates: &[ConversationRecord],
    options: &AutoLinkOptions,
) -> Vec<AutoLinkScore> {
    let commit_files = normalized_set(&commit.changed_files);
    if commit_files.is_empty() {
        return vec![];
    }
    let window_start = options.window_start(commit.committed_at);

    let mut scores: Vec<AutoLinkScore> = candidates
        .iter()
        .filter(|c| c.updated_at <= commit.committed_at && c.updated_at >= window_start)
        .filter_map(|c| {
            let conversation_files = normalized_set(&c.all_files());
            let matched_files: Vec<String> = commit_files
                .intersection(&conversation_files)
                .cloned()
                .collect();

            let file_overlap = matched_files.len() as f64 / commit_files.len() as f64;
            let recency = recency(
                days_between(&commit.committed_at, &c.updated_at),
                options.window_days,
            );
            let score = combined_score(file_overlap, recency);

            (score >= options.min_score).then(|| AutoLinkScore {
                conversation_id: c.id.clone(),
                score,
                file_overlap,
                recency,
                matched_files,
            })
        })
        .collect();

    scores.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    scores
}

/// Score a recorded commit against the store and persist the results as auto
/// links. Existing manual links are left alone.
///
/// An unknown hash or an empty commit yields no scores.
pub fn auto_link_commit(
    store: &mut LinkStore,
    commit_hash: &str,
    options: &AutoLinkOptions,
    now: DateTime<Utc>,
) -> Result<Vec<AutoLinkScore>> {
    let Some(commit) = store.get_commit(commit_hash)? else {
        debug!(%commit_hash, "commit not recorded, nothing to link");
        return Ok(vec![]);
    };
    if commit.changed_files.is_empty() {
        debug!(%commit_hash, "commit changed no files, skipping link pass");
        return Ok(vec![]);
    }

    let window_start = options.window_start(commit.committed_at);
    let pool = store.conversations_updated_between(&window_start, &commit.committed_at)?;
    let scores = score_candidates(&commit, &pool, options);

    for candidate in &scores {
        let written = store.upsert_auto_link(&LinkRecord {
            conversation_id: candidate.conversation_id.clone(),
            commit_hash: commit.hash.clone(),
            matched_files: candidate.matched_files.clone(),
            confidence: candidate.score,
            status: LinkStatus::Auto,
            created_at: now,
        })?;
        if !written {
            debug!(conversation = %candidate.conversation_id, "manual link kept");
        }
    }

    info!(
        commit = %commit.hash,
        candidates = pool.len(),
        linked = scores.len(),
        "auto-link pass finished"
    );
    Ok(scores)
}

/// Record a user-confirmed link. Confidence defaults to 1.0 and is clamped to
/// [0, 1]; `commit` may be a unique prefix of a recorded hash.
pub fn link_manually(
    store: &mut LinkStore,
    conversation_id: &str,
    commit: &str,
    confidence: Option<f64>,
    now: DateTime<Utc>,
) -> Result<LinkRecord> {
    let conversation = store
        .get_conversation(conversation_id)?
        .ok_or_else(|| TetherError::UnknownConversation(conversation_id.to_string()))?;

    let commit_record = match store.get_commit(commit)? {
        Some(c) => c,
        None => {
            let full = store
                .resolve_commit_prefix(commit)?
                .ok_or_else(|| TetherError::UnknownCommit(commit.to_string()))?;
            store
                .get_commit(&full)?
                .ok_or_else(|| TetherError::UnknownCommit(commit.to_string()))?
        }
    };

    let commit_files = normalized_set(&commit_record.changed_files);
    let conversation_files = normalized_set(&conversation.all_files());
    let matched_files = commit_files
        .intersection(&conversation_files)
        .cloned()
        .collect();

    let confidence = confidence
        .filter(|c| c.is_finite())
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);

    let link = LinkRecord {
        conversation_id: conversation.id,
        commit_hash: commit_record.hash,
        matched_files,
        confidence,
        status: LinkStatus::Manual,
        created_at: now,
    };
    store.upsert_link(&link)?;
    // created_at of a pre-existing link is preserved by the store
    Ok(store
        .get_link(&link.conversation_id, &link.commit_hash)?
        .unwrap_or(link))
}
