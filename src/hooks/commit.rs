//! commit: record a commit and link it to the conversations behind it

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::HookOutcome;
use crate::config::LinkingConfig;
use crate::linker::{auto_link_commit, AutoLinkOptions};
use crate::store::{CommitRecord, LinkStore};

/// Store `commit` and, when asked, run the auto-link pass for it.
/// Returns the number of conversations linked.
pub fn record_commit(
    store: &mut LinkStore,
    commit: &CommitRecord,
    options: &AutoLinkOptions,
    auto_link: bool,
    now: DateTime<Utc>,
) -> Result<usize> {
    store.upsert_commit(commit)?;
    if !auto_link {
        debug!(hash = %commit.hash, "auto-link disabled");
        return Ok(0);
    }
    Ok(auto_link_commit(store, &commit.hash, options, now)?.len())
}

pub fn handle_commit(
    store: &mut LinkStore,
    linking: &LinkingConfig,
    commit: CommitRecord,
    now: DateTime<Utc>,
) -> Result<HookOutcome> {
    let linked = record_commit(
        store,
        &commit,
        &AutoLinkOptions::from(linking),
        linking.auto_link,
        now,
    )?;
    Ok(HookOutcome::Commit {
        changed_files: commit.changed_files.len(),
        hash: commit.hash,
        linked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConversationUpdate, LinkStatus};
    use chrono::Duration;

    fn commit(now: DateTime<Utc>) -> CommitRecord {
        CommitRecord {
            hash: "a1b2c3d4e5f6".repeat(3),
            repo_path: "/work/app".into(),
            branch: Some("main".into()),
            author: None,
            message: "Fix login".into(),
            committed_at: now,
            changed_files: vec!["src/Login.tsx".into()],
            created_at: now,
        }
    }

    fn seeded_store(now: DateTime<Utc>) -> LinkStore {
        let mut store = LinkStore::open_in_memory().unwrap();
        let mut update =
            ConversationUpdate::new("c1", Some("cursor"), "/work/app", "app", now - Duration::hours(1));
        update.captured_files = vec!["src/Login.tsx".into()];
        store.upsert_conversation(update).unwrap();
        store
    }

    #[test]
    fn test_commit_links_recent_conversation() {
        let now = Utc::now();
        let mut store = seeded_store(now);
        let outcome = handle_commit(&mut store, &LinkingConfig::default(), commit(now), now).unwrap();

        assert!(matches!(
            outcome,
            HookOutcome::Commit {
                changed_files: 1,
                linked: 1,
                ..
            }
        ));
        let links = store.get_links_for_commit(&commit(now).hash).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link.status, LinkStatus::Auto);
    }

    #[test]
    fn test_auto_link_can_be_disabled() {
        let now = Utc::now();
        let mut store = seeded_store(now);
        let linking = LinkingConfig {
            auto_link: false,
            ..Default::default()
        };
        let outcome = handle_commit(&mut store, &linking, commit(now), now).unwrap();
        assert!(matches!(outcome, HookOutcome::Commit { linked: 0, .. }));
        assert!(store.get_commit(&commit(now).hash).unwrap().is_some());
        assert_eq!(store.stats().unwrap().links, 0);
    }
}
