//! Field-level merge rules for conversation upserts
//!
//! Hooks write partial views of a conversation from independent processes in
//! any order. Each column has one declared policy; [`merge_conversation`]
//! applies them and is the only place a stored row is combined with an
//! incoming one. The policies make concurrent partial writes commute: adding
//! file X then Y equals adding Y then X, and a write that lacks a title can
//! not erase one learned earlier.

use chrono::{DateTime, Utc};

use super::{ConversationRecord, ConversationUpdate, UNKNOWN_AGENT};

/// How a text column combines prior and incoming values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextPolicy {
    /// Incoming value wins, even when absent
    Replace,
    /// Incoming value wins unless absent or blank
    Coalesce,
}

/// How a file-list column combines prior and incoming values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPolicy {
    /// A provided list replaces the stored one wholesale; an omitted list
    /// leaves it alone
    ReplaceIfProvided,
    /// Set union, prior order first
    Union,
}

/// How a timestamp column combines prior and incoming values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePolicy {
    /// First write wins
    SetOnce,
    /// Later of the two
    Advance,
}

impl TextPolicy {
    pub fn apply(self, prior: Option<String>, incoming: Option<String>) -> Option<String> {
        let incoming = incoming.filter(|s| !s.trim().is_empty());
        match self {
            TextPolicy::Replace => incoming,
            TextPolicy::Coalesce => incoming.or(prior),
        }
    }
}

impl ListPolicy {
    pub fn apply(self, prior: Vec<String>, incoming: Option<Vec<String>>) -> Vec<String> {
        match (self, incoming) {
            (ListPolicy::ReplaceIfProvided, Some(list)) => dedup_in_order(list),
            (ListPolicy::ReplaceIfProvided, None) => prior,
            (ListPolicy::Union, Some(list)) => dedup_in_order(prior.into_iter().chain(list).collect()),
            (ListPolicy::Union, None) => prior,
        }
    }
}

impl TimePolicy {
    pub fn apply(self, prior: DateTime<Utc>, incoming: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimePolicy::SetOnce => prior,
            TimePolicy::Advance => prior.max(incoming),
        }
    }
}

/// Declared policy for every mergeable conversation column.
///
/// `workspace_root` and `project_name` are plain last-write-wins and need
/// no entry.
#[derive(Debug, Clone, Copy)]
pub struct ConversationPolicy {
    pub agent: TextPolicy,
    pub title: TextPolicy,
    pub summary: TextPolicy,
    pub ai_summary: TextPolicy,
    pub searchable_text: TextPolicy,
    pub last_hook_event: TextPolicy,
    pub relevant_files: ListPolicy,
    pub attached_folders: ListPolicy,
    pub captured_files: ListPolicy,
    pub created_at: TimePolicy,
    pub updated_at: TimePolicy,
}

pub const CONVERSATION_POLICY: ConversationPolicy = ConversationPolicy {
    agent: TextPolicy::Coalesce,
    title: TextPolicy::Coalesce,
    summary: TextPolicy::Coalesce,
    ai_summary: TextPolicy::Coalesce,
    searchable_text: TextPolicy::Coalesce,
    last_hook_event: TextPolicy::Coalesce,
    relevant_files: ListPolicy::ReplaceIfProvided,
    attached_folders: ListPolicy::ReplaceIfProvided,
    captured_files: ListPolicy::Union,
    created_at: TimePolicy::SetOnce,
    updated_at: TimePolicy::Advance,
};

/// Combine the stored row (if any) with an incoming partial update.
pub fn merge_conversation(
    prior: Option<ConversationRecord>,
    update: ConversationUpdate,
    policy: &ConversationPolicy,
) -> ConversationRecord {
    let Some(prior) = prior else {
        return ConversationRecord {
            id: update.id,
            agent: policy
                .agent
                .apply(None, update.agent)
                .unwrap_or_else(|| UNKNOWN_AGENT.to_string()),
            workspace_root: update.workspace_root,
            project_name: update.project_name,
            title: policy.title.apply(None, update.title),
            summary: policy.summary.apply(None, update.summary),
            ai_summary: policy.ai_summary.apply(None, update.ai_summary),
            searchable_text: policy.searchable_text.apply(None, update.searchable_text),
            relevant_files: policy.relevant_files.apply(vec![], update.relevant_files),
            attached_folders: policy.attached_folders.apply(vec![], update.attached_folders),
            captured_files: policy.captured_files.apply(vec![], Some(update.captured_files)),
            created_at: update.timestamp,
            updated_at: update.timestamp,
            last_hook_event: policy.last_hook_event.apply(None, update.last_hook_event),
        };
    };

    ConversationRecord {
        id: prior.id,
        agent: policy
            .agent
            .apply(Some(prior.agent), update.agent)
            .unwrap_or_else(|| UNKNOWN_AGENT.to_string()),
        workspace_root: update.workspace_root,
        project_name: update.project_name,
        title: policy.title.apply(prior.title, update.title),
        summary: policy.summary.apply(prior.summary, update.summary),
        ai_summary: policy.ai_summary.apply(prior.ai_summary, update.ai_summary),
        searchable_text: policy
            .searchable_text
            .apply(prior.searchable_text, update.searchable_text),
        relevant_files: policy
            .relevant_files
            .apply(prior.relevant_files, update.relevant_files),
        attached_folders: policy
            .attached_folders
            .apply(prior.attached_folders, update.attached_folders),
        captured_files: policy
            .captured_files
            .apply(prior.captured_files, Some(update.captured_files)),
        created_at: policy.created_at.apply(prior.created_at, update.timestamp),
        updated_at: policy.updated_at.apply(prior.updated_at, update.timestamp),
        last_hook_event: policy
            .last_hook_event
            .apply(prior.last_hook_event, update.last_hook_event),
    }
}

fn dedup_in_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn update(id: &str, at: DateTime<Utc>) -> ConversationUpdate {
        ConversationUpdate::new(id, Some("cursor"), "/work/app", "app", at)
    }

    fn files(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_captured_files_union_commutes() {
        let mut a = update("c1", t(1));
        a.captured_files = files(&["a.ts", "shared.ts"]);
        let mut b = update("c1", t(2));
        b.captured_files = files(&["b.ts", "shared.ts"]);

        let ab = merge_conversation(
            Some(merge_conversation(None, a.clone(), &CONVERSATION_POLICY)),
            b.clone(),
            &CONVERSATION_POLICY,
        );
        let ba = merge_conversation(
            Some(merge_conversation(None, b, &CONVERSATION_POLICY)),
            a,
            &CONVERSATION_POLICY,
        );

        let mut left = ab.captured_files.clone();
        let mut right = ba.captured_files.clone();
        left.sort();
        right.sort();
        assert_eq!(left, files(&["a.ts", "b.ts", "shared.ts"]));
        assert_eq!(left, right);
        assert_eq!(ab.updated_at, ba.updated_at);
    }

    #[test]
    fn test_null_or_blank_text_never_erases() {
        let mut first = update("c1", t(1));
        first.title = Some("Refactor auth".into());
        first.summary = Some("Moved token refresh".into());
        let stored = merge_conversation(None, first, &CONVERSATION_POLICY);

        let mut second = update("c1", t(2));
        second.summary = Some("   ".into());
        let merged = merge_conversation(Some(stored), second, &CONVERSATION_POLICY);

        assert_eq!(merged.title.as_deref(), Some("Refactor auth"));
        assert_eq!(merged.summary.as_deref(), Some("Moved token refresh"));
    }

    #[test]
    fn test_relevant_files_replace_only_when_provided() {
        let mut first = update("c1", t(1));
        first.relevant_files = Some(files(&["old.ts"]));
        let stored = merge_conversation(None, first, &CONVERSATION_POLICY);

        let untouched =
            merge_conversation(Some(stored.clone()), update("c1", t(2)), &CONVERSATION_POLICY);
        assert_eq!(untouched.relevant_files, files(&["old.ts"]));

        let mut replacing = update("c1", t(3));
        replacing.relevant_files = Some(files(&["new.ts"]));
        let replaced = merge_conversation(Some(stored), replacing, &CONVERSATION_POLICY);
        assert_eq!(replaced.relevant_files, files(&["new.ts"]));
    }

    #[test]
    fn test_created_set_once_updated_only_advances() {
        let stored = merge_conversation(None, update("c1", t(5)), &CONVERSATION_POLICY);
        let late_replay = update("c1", t(5) - Duration::hours(3));
        let merged = merge_conversation(Some(stored), late_replay, &CONVERSATION_POLICY);
        assert_eq!(merged.created_at, t(5));
        assert_eq!(merged.updated_at, t(5));
    }

    #[test]
    fn test_agent_is_kept_when_a_later_write_omits_it() {
        let stored = merge_conversation(None, update("c1", t(1)), &CONVERSATION_POLICY);
        let mut anonymous = update("c1", t(2));
        anonymous.agent = None;
        let merged = merge_conversation(Some(stored), anonymous.clone(), &CONVERSATION_POLICY);
        assert_eq!(merged.agent, "cursor");

        let fresh = merge_conversation(None, anonymous, &CONVERSATION_POLICY);
        assert_eq!(fresh.agent, UNKNOWN_AGENT);
    }

    #[test]
    fn test_replace_policy_drops_prior() {
        assert_eq!(
            TextPolicy::Replace.apply(Some("x".into()), None),
            None
        );
        assert_eq!(
            TextPolicy::Coalesce.apply(Some("x".into()), None).as_deref(),
            Some("x")
        );
    }
}
