//! Link storage with SQLite
//!
//! Three tables: conversations, commits, and the links between them.
//! Upsert semantics differ per entity:
//! - conversations merge field by field (see [`merge`])
//! - commits are immutable facts; re-recording replaces metadata
//! - links are unique per pair; the last decision replaces the previous one
//!
//! Hooks run as concurrent short-lived processes against one file, so every
//! write happens in a single IMMEDIATE transaction.

pub mod merge;
mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::TetherError;
use crate::util::{format_timestamp, normalize_for_match};

pub use merge::{merge_conversation, CONVERSATION_POLICY};
pub use schema::SCHEMA;

/// Agent tag stored when no write has ever named one
pub const UNKNOWN_AGENT: &str = "unknown";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Characters of context kept on each side of a keyword hit
const EXCERPT_RADIUS: usize = 60;
const MAX_EXCERPTS: usize = 3;

// ============================================
// RECORDS
// ============================================

/// Persisted conversation row
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub agent: String,
    pub workspace_root: String,
    pub project_name: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub ai_summary: Option<String>,
    pub searchable_text: Option<String>,
    pub relevant_files: Vec<String>,
    pub attached_folders: Vec<String>,
    pub captured_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_hook_event: Option<String>,
}

impl ConversationRecord {
    /// relevant ∪ captured, in that order
    pub fn all_files(&self) -> Vec<String> {
        let mut files = self.relevant_files.clone();
        for f in &self.captured_files {
            if !files.contains(f) {
                files.push(f.clone());
            }
        }
        files
    }
}

/// Partial view of a conversation as seen by one hook invocation.
///
/// `None` list fields mean "not observed"; `captured_files` is always merged.
#[derive(Debug, Clone)]
pub struct ConversationUpdate {
    pub id: String,
    pub agent: Option<String>,
    pub workspace_root: String,
    pub project_name: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub ai_summary: Option<String>,
    pub searchable_text: Option<String>,
    pub relevant_files: Option<Vec<String>>,
    pub attached_folders: Option<Vec<String>>,
    pub captured_files: Vec<String>,
    pub last_hook_event: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationUpdate {
    pub fn new(
        id: impl Into<String>,
        agent: Option<&str>,
        workspace_root: impl Into<String>,
        project_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.map(String::from),
            workspace_root: workspace_root.into(),
            project_name: project_name.into(),
            title: None,
            summary: None,
            ai_summary: None,
            searchable_text: None,
            relevant_files: None,
            attached_folders: None,
            captured_files: vec![],
            last_hook_event: None,
            timestamp,
        }
    }
}

/// Persisted commit row
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub hash: String,
    pub repo_path: String,
    pub branch: Option<String>,
    pub author: Option<String>,
    pub message: String,
    pub committed_at: DateTime<Utc>,
    pub changed_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Auto,
    Manual,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Auto => "auto",
            LinkStatus::Manual => "manual",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(LinkStatus::Auto),
            "manual" => Ok(LinkStatus::Manual),
            other => Err(anyhow::anyhow!("Unknown link status: {}", other)),
        }
    }
}

/// Persisted link row
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub conversation_id: String,
    pub commit_hash: String,
    pub matched_files: Vec<String>,
    pub confidence: f64,
    pub status: LinkStatus,
    pub created_at: DateTime<Utc>,
}

/// A link joined with its commit
#[derive(Debug, Clone)]
pub struct LinkedCommit {
    pub link: LinkRecord,
    pub commit: CommitRecord,
}

/// A link joined with its conversation
#[derive(Debug, Clone)]
pub struct LinkedConversation {
    pub link: LinkRecord,
    pub conversation: ConversationRecord,
}

/// Filters for [`LinkStore::find_conversations`]; unset fields match anything
#[derive(Debug, Clone)]
pub struct ConversationFilter {
    pub workspace_root: Option<String>,
    pub project_name: Option<String>,
    /// Substring of any relevant or captured file (match-normalized)
    pub file: Option<String>,
    pub agent: Option<String>,
    pub limit: usize,
}

impl Default for ConversationFilter {
    fn default() -> Self {
        Self {
            workspace_root: None,
            project_name: None,
            file: None,
            agent: None,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitFilter {
    pub repo_path: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for CommitFilter {
    fn default() -> Self {
        Self {
            repo_path: None,
            since: None,
            until: None,
            limit: 50,
        }
    }
}

/// How a stored file set relates to the queried path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Exact match after normalization
    Direct,
    /// One path contains the other
    Indirect,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Direct => "direct",
            MatchKind::Indirect => "indirect",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub conversation: ConversationRecord,
    pub match_kind: MatchKind,
    pub matched_file: String,
    pub excerpts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CommitContext {
    pub commit: CommitRecord,
    pub match_kind: MatchKind,
    pub matched_file: String,
}

/// Everything recorded about one file path
#[derive(Debug, Clone, Default)]
pub struct FileContext {
    pub conversations: Vec<ConversationContext>,
    pub commits: Vec<CommitContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub conversations: i64,
    pub commits: i64,
    pub links: i64,
    pub auto_links: i64,
    pub manual_links: i64,
}

// ============================================
// STORE
// ============================================

pub struct LinkStore {
    conn: Connection,
}

/// Open the store at `path`, run `f`, and close the store on every exit
/// path, including when `f` fails.
pub fn with_store<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce(&mut LinkStore) -> Result<T>,
{
    let mut store = LinkStore::open(path)?;
    let result = f(&mut store);
    match store.close() {
        Ok(()) => result,
        Err(close_err) => match result {
            Ok(_) => Err(close_err),
            Err(e) => {
                debug!("store close failed after error: {close_err:#}");
                Err(e)
            }
        },
    }
}

impl LinkStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open store {}", path.display()))?;
        Self::init(conn)
    }

    /// Private in-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(%mode, "store journal mode");
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| anyhow::Error::from(e).context("Failed to close store"))
    }

    // ============================================
    // CONVERSATIONS
    // ============================================

    /// Merge `update` into the stored row and return the result
    pub fn upsert_conversation(&mut self, update: ConversationUpdate) -> Result<ConversationRecord> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let prior = query_conversation(&tx, &update.id)?;
        let merged = merge_conversation(prior, update, &CONVERSATION_POLICY);

        tx.execute(
            r#"INSERT INTO conversations
               (id, agent, workspace_root, project_name, title, summary, ai_summary,
                searchable_text, relevant_files, attached_folders, captured_files,
                created_at, updated_at, last_hook_event)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
               ON CONFLICT(id) DO UPDATE SET
                   agent = excluded.agent,
                   workspace_root = excluded.workspace_root,
                   project_name = excluded.project_name,
                   title = excluded.title,
                   summary = excluded.summary,
                   ai_summary = excluded.ai_summary,
                   searchable_text = excluded.searchable_text,
                   relevant_files = excluded.relevant_files,
                   attached_folders = excluded.attached_folders,
                   captured_files = excluded.captured_files,
                   updated_at = excluded.updated_at,
                   last_hook_event = excluded.last_hook_event"#,
            params![
                merged.id,
                merged.agent,
                merged.workspace_root,
                merged.project_name,
                merged.title,
                merged.summary,
                merged.ai_summary,
                merged.searchable_text,
                to_json(&merged.relevant_files)?,
                to_json(&merged.attached_folders)?,
                to_json(&merged.captured_files)?,
                format_timestamp(&merged.created_at),
                format_timestamp(&merged.updated_at),
                merged.last_hook_event,
            ],
        )?;
        tx.commit()?;

        debug!(id = %merged.id, files = merged.captured_files.len(), "conversation upserted");
        Ok(merged)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        query_conversation(&self.conn, id)
    }

    /// Conversations matching every set filter, most recently updated first
    pub fn find_conversations(&self, filter: &ConversationFilter) -> Result<Vec<ConversationRecord>> {
        let mut clauses = vec![];
        let mut args: Vec<String> = vec![];
        if let Some(root) = &filter.workspace_root {
            args.push(root.clone());
            clauses.push(format!("workspace_root = ?{}", args.len()));
        }
        if let Some(project) = &filter.project_name {
            args.push(project.clone());
            clauses.push(format!("project_name = ?{}", args.len()));
        }
        if let Some(agent) = &filter.agent {
            args.push(agent.clone());
            clauses.push(format!("agent = ?{}", args.len()));
        }

        let mut query = format!("SELECT {} FROM conversations", CONVERSATION_COLUMNS);
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY updated_at DESC");

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            conversation_from_row(row, 0)
        })?;

        let needle = filter
            .file
            .as_deref()
            .map(normalize_for_match)
            .filter(|n| !n.is_empty());

        let mut results = vec![];
        for row in rows {
            let conversation = row?;
            if let Some(needle) = &needle {
                let hit = conversation
                    .all_files()
                    .iter()
                    .any(|f| normalize_for_match(f).contains(needle.as_str()));
                if !hit {
                    continue;
                }
            }
            results.push(conversation);
            if results.len() >= filter.limit {
                break;
            }
        }
        Ok(results)
    }

    /// Conversations whose `updated_at` lies in `[start, end]`
    pub fn conversations_updated_between(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<ConversationRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM conversations
             WHERE updated_at >= ?1 AND updated_at <= ?2
             ORDER BY updated_at DESC",
            CONVERSATION_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![format_timestamp(start), format_timestamp(end)],
            |row| conversation_from_row(row, 0),
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ============================================
    // COMMITS
    // ============================================

    /// Insert or fully replace a commit's metadata (created_at is kept)
    pub fn upsert_commit(&mut self, commit: &CommitRecord) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            r#"INSERT INTO commits
               (hash, repo_path, branch, author, message, committed_at, changed_files, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(hash) DO UPDATE SET
                   repo_path = excluded.repo_path,
                   branch = excluded.branch,
                   author = excluded.author,
                   message = excluded.message,
                   committed_at = excluded.committed_at,
                   changed_files = excluded.changed_files"#,
            params![
                commit.hash,
                commit.repo_path,
                commit.branch,
                commit.author,
                commit.message,
                format_timestamp(&commit.committed_at),
                to_json(&commit.changed_files)?,
                format_timestamp(&commit.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_commit(&self, hash: &str) -> Result<Option<CommitRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM commits WHERE hash = ?", COMMIT_COLUMNS),
                params![hash],
                |row| commit_from_row(row, 0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Full hash for a unique prefix of a recorded commit
    pub fn resolve_commit_prefix(&self, prefix: &str) -> Result<Option<String>> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Ok(None);
        }
        let mut stmt = self.conn.prepare(
            "SELECT hash FROM commits WHERE substr(hash, 1, length(?1)) = ?1 ORDER BY hash LIMIT 2",
        )?;
        let hashes = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match hashes.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.clone())),
            _ => Err(TetherError::AmbiguousCommit(prefix).into()),
        }
    }

    /// Commits newest first, optionally scoped to a repo and date range
    pub fn find_commits(&self, filter: &CommitFilter) -> Result<Vec<CommitRecord>> {
        let mut clauses = vec![];
        let mut args: Vec<String> = vec![];
        if let Some(repo) = &filter.repo_path {
            args.push(repo.clone());
            clauses.push(format!("repo_path = ?{}", args.len()));
        }
        if let Some(since) = &filter.since {
            args.push(format_timestamp(since));
            clauses.push(format!("committed_at >= ?{}", args.len()));
        }
        if let Some(until) = &filter.until {
            args.push(format_timestamp(until));
            clauses.push(format!("committed_at <= ?{}", args.len()));
        }

        let mut query = format!("SELECT {} FROM commits", COMMIT_COLUMNS);
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(&format!(" ORDER BY committed_at DESC LIMIT {}", filter.limit));

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            commit_from_row(row, 0)
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ============================================
    // LINKS
    // ============================================

    /// Insert or replace the link for a pair; `created_at` of an existing
    /// link is kept
    pub fn upsert_link(&mut self, link: &LinkRecord) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        write_link(
            &tx,
            &format!(
                "{} ON CONFLICT(conversation_id, commit_hash) DO UPDATE SET {}",
                LINK_INSERT, LINK_REPLACE
            ),
            link,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Like [`upsert_link`](Self::upsert_link) but leaves an existing manual
    /// link untouched. Returns whether a row was written.
    pub fn upsert_auto_link(&mut self, link: &LinkRecord) -> Result<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = write_link(
            &tx,
            &format!(
                "{} ON CONFLICT(conversation_id, commit_hash) DO UPDATE SET {} \
                 WHERE conversation_commit_links.status != 'manual'",
                LINK_INSERT, LINK_REPLACE
            ),
            link,
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    pub fn get_link(&self, conversation_id: &str, commit_hash: &str) -> Result<Option<LinkRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM conversation_commit_links l
                     WHERE l.conversation_id = ?1 AND l.commit_hash = ?2",
                    LINK_COLUMNS
                ),
                params![conversation_id, commit_hash],
                |row| link_from_row(row, 0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Commits linked to a conversation, newest commit first
    pub fn get_links_for_conversation(&self, conversation_id: &str) -> Result<Vec<LinkedCommit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}, {} FROM conversation_commit_links l
             JOIN commits c ON c.hash = l.commit_hash
             WHERE l.conversation_id = ?1
             ORDER BY c.committed_at DESC",
            LINK_COLUMNS,
            prefixed(COMMIT_COLUMNS, "c")
        ))?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(LinkedCommit {
                link: link_from_row(row, 0)?,
                commit: commit_from_row(row, LINK_COLUMN_COUNT)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Conversations linked to a commit, most confident first
    pub fn get_links_for_commit(&self, commit_hash: &str) -> Result<Vec<LinkedConversation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}, {} FROM conversation_commit_links l
             JOIN conversations v ON v.id = l.conversation_id
             WHERE l.commit_hash = ?1
             ORDER BY l.confidence DESC",
            LINK_COLUMNS,
            prefixed(CONVERSATION_COLUMNS, "v")
        ))?;
        let rows = stmt.query_map(params![commit_hash], |row| {
            Ok(LinkedConversation {
                link: link_from_row(row, 0)?,
                conversation: conversation_from_row(row, LINK_COLUMN_COUNT)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ============================================
    // QUERIES
    // ============================================

    /// Conversations and commits that touched `path`.
    ///
    /// Paths are free text: anything that normalizes to nothing simply
    /// matches nothing. `keyword` narrows conversations (not commits) to those
    /// whose searchable text contains it, and fills in excerpts.
    pub fn file_context(&self, path: &str, keyword: Option<&str>) -> Result<FileContext> {
        let needle = normalize_for_match(path);
        let needle = needle.trim_end_matches('/');
        if needle.is_empty() {
            return Ok(FileContext::default());
        }
        let keyword = keyword.map(str::trim).filter(|k| !k.is_empty());

        let mut context = FileContext::default();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM conversations ORDER BY updated_at DESC",
            CONVERSATION_COLUMNS
        ))?;
        let rows = stmt.query_map([], |row| conversation_from_row(row, 0))?;
        for row in rows {
            let conversation = row?;
            let Some((match_kind, matched_file)) = best_match(&conversation.all_files(), needle)
            else {
                continue;
            };

            let excerpts = match keyword {
                Some(keyword) => {
                    let text = search_text(&conversation);
                    let found = excerpts(&text, keyword);
                    if found.is_empty() {
                        continue;
                    }
                    found
                }
                None => vec![],
            };

            context.conversations.push(ConversationContext {
                conversation,
                match_kind,
                matched_file,
                excerpts,
            });
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM commits ORDER BY committed_at DESC",
            COMMIT_COLUMNS
        ))?;
        let rows = stmt.query_map([], |row| commit_from_row(row, 0))?;
        for row in rows {
            let commit = row?;
            if let Some((match_kind, matched_file)) = best_match(&commit.changed_files, needle) {
                context.commits.push(CommitContext {
                    commit,
                    match_kind,
                    matched_file,
                });
            }
        }

        // Direct hits ahead of indirect ones; sort is stable so recency order holds
        context
            .conversations
            .sort_by_key(|c| c.match_kind != MatchKind::Direct);
        context.commits.sort_by_key(|c| c.match_kind != MatchKind::Direct);
        Ok(context)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<i64> {
            self.conn
                .query_row(sql, [], |row| row.get(0))
                .map_err(Into::into)
        };
        Ok(StoreStats {
            conversations: count("SELECT COUNT(*) FROM conversations")?,
            commits: count("SELECT COUNT(*) FROM commits")?,
            links: count("SELECT COUNT(*) FROM conversation_commit_links")?,
            auto_links: count(
                "SELECT COUNT(*) FROM conversation_commit_links WHERE status = 'auto'",
            )?,
            manual_links: count(
                "SELECT COUNT(*) FROM conversation_commit_links WHERE status = 'manual'",
            )?,
        })
    }
}

// ============================================
// ROW MAPPING
// ============================================

const CONVERSATION_COLUMNS: &str = "id, agent, workspace_root, project_name, title, summary, \
     ai_summary, searchable_text, relevant_files, attached_folders, captured_files, \
     created_at, updated_at, last_hook_event";

const COMMIT_COLUMNS: &str =
    "hash, repo_path, branch, author, message, committed_at, changed_files, created_at";

const LINK_COLUMNS: &str =
    "l.conversation_id, l.commit_hash, l.matched_files, l.confidence, l.status, l.created_at";
const LINK_COLUMN_COUNT: usize = 6;

const LINK_INSERT: &str = "INSERT INTO conversation_commit_links \
     (conversation_id, commit_hash, matched_files, confidence, status, created_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const LINK_REPLACE: &str = "matched_files = excluded.matched_files, \
     confidence = excluded.confidence, status = excluded.status";

/// `a, b` -> `t.a, t.b`
fn prefixed(columns: &str, table: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{}.{}", table, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM conversations WHERE id = ?", CONVERSATION_COLUMNS),
        params![id],
        |row| conversation_from_row(row, 0),
    )
    .optional()
    .map_err(Into::into)
}

fn conversation_from_row(row: &Row, offset: usize) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: row.get(offset)?,
        agent: row.get(offset + 1)?,
        workspace_root: row.get(offset + 2)?,
        project_name: row.get(offset + 3)?,
        title: row.get(offset + 4)?,
        summary: row.get(offset + 5)?,
        ai_summary: row.get(offset + 6)?,
        searchable_text: row.get(offset + 7)?,
        relevant_files: json_list(row, offset + 8)?,
        attached_folders: json_list(row, offset + 9)?,
        captured_files: json_list(row, offset + 10)?,
        created_at: timestamp(row, offset + 11)?,
        updated_at: timestamp(row, offset + 12)?,
        last_hook_event: row.get(offset + 13)?,
    })
}

fn commit_from_row(row: &Row, offset: usize) -> rusqlite::Result<CommitRecord> {
    Ok(CommitRecord {
        hash: row.get(offset)?,
        repo_path: row.get(offset + 1)?,
        branch: row.get(offset + 2)?,
        author: row.get(offset + 3)?,
        message: row.get(offset + 4)?,
        committed_at: timestamp(row, offset + 5)?,
        changed_files: json_list(row, offset + 6)?,
        created_at: timestamp(row, offset + 7)?,
    })
}

fn link_from_row(row: &Row, offset: usize) -> rusqlite::Result<LinkRecord> {
    let status: String = row.get(offset + 4)?;
    let status = status.parse::<LinkStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(offset + 4, Type::Text, e.into())
    })?;
    Ok(LinkRecord {
        conversation_id: row.get(offset)?,
        commit_hash: row.get(offset + 1)?,
        matched_files: json_list(row, offset + 2)?,
        confidence: row.get(offset + 3)?,
        status,
        created_at: timestamp(row, offset + 5)?,
    })
}

fn write_link(conn: &Connection, sql: &str, link: &LinkRecord) -> Result<usize> {
    let changed = conn.execute(
        sql,
        params![
            link.conversation_id,
            link.commit_hash,
            to_json(&link.matched_files)?,
            link.confidence.clamp(0.0, 1.0),
            link.status.as_str(),
            format_timestamp(&link.created_at),
        ],
    )?;
    Ok(changed)
}

fn to_json(list: &[String]) -> Result<String> {
    serde_json::to_string(list).context("Failed to encode file list")
}

fn json_list(row: &Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(vec![]),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

fn timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================
// FILE CONTEXT HELPERS
// ============================================

/// Strongest relation between any of `files` and the normalized `needle`
fn best_match(files: &[String], needle: &str) -> Option<(MatchKind, String)> {
    let mut indirect = None;
    for file in files {
        let normalized = normalize_for_match(file);
        if normalized.is_empty() {
            continue;
        }
        if normalized == needle {
            return Some((MatchKind::Direct, file.clone()));
        }
        if indirect.is_none() && (normalized.contains(needle) || needle.contains(&normalized)) {
            indirect = Some((MatchKind::Indirect, file.clone()));
        }
    }
    indirect
}

fn search_text(conversation: &ConversationRecord) -> String {
    conversation
        .searchable_text
        .clone()
        .or_else(|| {
            let parts: Vec<&str> = [&conversation.title, &conversation.summary]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        })
        .unwrap_or_default()
}

/// Up to [`MAX_EXCERPTS`] snippets of `text` around case-insensitive hits of
/// `keyword`, each with [`EXCERPT_RADIUS`] characters of context
pub(crate) fn excerpts(text: &str, keyword: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let folded: Vec<char> = chars.iter().map(|c| fold_char(*c)).collect();
    let needle: Vec<char> = keyword.chars().map(fold_char).collect();
    if needle.is_empty() || needle.len() > folded.len() {
        return vec![];
    }

    let mut found = vec![];
    let mut i = 0;
    while i + needle.len() <= folded.len() && found.len() < MAX_EXCERPTS {
        if folded[i..i + needle.len()] == needle[..] {
            let start = i.saturating_sub(EXCERPT_RADIUS);
            let end = (i + needle.len() + EXCERPT_RADIUS).min(chars.len());
            let mut snippet: String = chars[start..end].iter().collect();
            snippet = snippet.split_whitespace().collect::<Vec<_>>().join(" ");
            if start > 0 {
                snippet.insert_str(0, "...");
            }
            if end < chars.len() {
                snippet.push_str("...");
            }
            found.push(snippet);
            i = end.max(i + 1);
        } else {
            i += 1;
        }
    }
    found
}

fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn touch(store: &mut LinkStore, id: &str, files: &[&str], at: DateTime<Utc>) {
        let mut update = ConversationUpdate::new(id, Some("cursor"), "/work/app", "app", at);
        update.captured_files = files.iter().map(|s| s.to_string()).collect();
        update.last_hook_event = Some("file-touched".into());
        store.upsert_conversation(update).unwrap();
    }

    fn commit(hash: &str, files: &[&str], at: DateTime<Utc>) -> CommitRecord {
        CommitRecord {
            hash: hash.to_string(),
            repo_path: "/work/app".into(),
            branch: Some("main".into()),
            author: Some("Dev <dev@example.com>".into()),
            message: "Fix flicker".into(),
            committed_at: at,
            changed_files: files.iter().map(|s| s.to_string()).collect(),
            created_at: at,
        }
    }

    fn link(conversation: &str, hash: &str, confidence: f64, status: LinkStatus) -> LinkRecord {
        LinkRecord {
            conversation_id: conversation.into(),
            commit_hash: hash.into(),
            matched_files: vec!["src/a.ts".into()],
            confidence,
            status,
            created_at: t0(),
        }
    }

    #[test]
    fn test_sequential_file_touches_union() {
        let mut store = LinkStore::open_in_memory().unwrap();
        touch(&mut store, "c1", &["a.ts"], t0());
        touch(&mut store, "c1", &["b.ts"], t0() + Duration::minutes(1));
        touch(&mut store, "c1", &["a.ts"], t0() + Duration::minutes(2));

        let stored = store.get_conversation("c1").unwrap().unwrap();
        assert_eq!(stored.captured_files, vec!["a.ts", "b.ts"]);
        assert_eq!(stored.created_at, t0());
        assert_eq!(stored.updated_at, t0() + Duration::minutes(2));
    }

    #[test]
    fn test_session_end_does_not_clobber_title() {
        let mut store = LinkStore::open_in_memory().unwrap();
        let mut first = ConversationUpdate::new("c1", Some("cursor"), "/work/app", "app", t0());
        first.title = Some("Login flicker".into());
        store.upsert_conversation(first).unwrap();
        touch(&mut store, "c1", &["src/Login.tsx"], t0() + Duration::minutes(5));

        let stored = store.get_conversation("c1").unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Login flicker"));
        assert_eq!(stored.captured_files, vec!["src/Login.tsx"]);
    }

    #[test]
    fn test_commit_upsert_replaces_metadata() {
        let mut store = LinkStore::open_in_memory().unwrap();
        let original = commit("abc123", &["a.ts"], t0());
        store.upsert_commit(&original).unwrap();

        let mut amended = commit("abc123", &["b.ts"], t0() + Duration::hours(1));
        amended.message = "Amended".into();
        amended.created_at = t0() + Duration::hours(1);
        store.upsert_commit(&amended).unwrap();

        let stored = store.get_commit("abc123").unwrap().unwrap();
        assert_eq!(stored.changed_files, vec!["b.ts"]);
        assert_eq!(stored.message, "Amended");
        assert_eq!(stored.created_at, t0());
    }

    #[test]
    fn test_manual_link_overwrites_auto() {
        let mut store = LinkStore::open_in_memory().unwrap();
        touch(&mut store, "c1", &["src/a.ts"], t0());
        store.upsert_commit(&commit("abc123", &["src/a.ts"], t0())).unwrap();

        store.upsert_link(&link("c1", "abc123", 0.4, LinkStatus::Auto)).unwrap();
        let mut manual = link("c1", "abc123", 0.95, LinkStatus::Manual);
        manual.created_at = t0() + Duration::days(1);
        store.upsert_link(&manual).unwrap();

        let stored = store.get_link("c1", "abc123").unwrap().unwrap();
        assert_eq!(stored.status, LinkStatus::Manual);
        assert!((stored.confidence - 0.95).abs() < 1e-9);
        assert_eq!(stored.created_at, t0());
        assert_eq!(store.stats().unwrap().links, 1);
    }

    #[test]
    fn test_auto_link_never_replaces_manual() {
        let mut store = LinkStore::open_in_memory().unwrap();
        touch(&mut store, "c1", &["src/a.ts"], t0());
        store.upsert_commit(&commit("abc123", &["src/a.ts"], t0())).unwrap();

        assert!(store.upsert_auto_link(&link("c1", "abc123", 0.5, LinkStatus::Auto)).unwrap());
        store.upsert_link(&link("c1", "abc123", 1.0, LinkStatus::Manual)).unwrap();
        assert!(!store.upsert_auto_link(&link("c1", "abc123", 0.3, LinkStatus::Auto)).unwrap());

        let stored = store.get_link("c1", "abc123").unwrap().unwrap();
        assert_eq!(stored.status, LinkStatus::Manual);
        assert!((stored.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_link_joins_and_ordering() {
        let mut store = LinkStore::open_in_memory().unwrap();
        touch(&mut store, "c1", &["src/a.ts"], t0());
        touch(&mut store, "c2", &["src/a.ts"], t0());
        store.upsert_commit(&commit("old", &["src/a.ts"], t0() - Duration::days(2))).unwrap();
        store.upsert_commit(&commit("new", &["src/a.ts"], t0())).unwrap();

        store.upsert_link(&link("c1", "old", 0.9, LinkStatus::Auto)).unwrap();
        store.upsert_link(&link("c1", "new", 0.5, LinkStatus::Auto)).unwrap();
        store.upsert_link(&link("c2", "new", 0.8, LinkStatus::Auto)).unwrap();

        let for_c1 = store.get_links_for_conversation("c1").unwrap();
        let hashes: Vec<&str> = for_c1.iter().map(|l| l.commit.hash.as_str()).collect();
        assert_eq!(hashes, vec!["new", "old"]);

        let for_new = store.get_links_for_commit("new").unwrap();
        let ids: Vec<&str> = for_new.iter().map(|l| l.conversation.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
    }

    #[test]
    fn test_resolve_commit_prefix() {
        let mut store = LinkStore::open_in_memory().unwrap();
        store.upsert_commit(&commit("abc111", &[], t0())).unwrap();
        store.upsert_commit(&commit("abc222", &[], t0())).unwrap();

        assert_eq!(
            store.resolve_commit_prefix("ABC1").unwrap().as_deref(),
            Some("abc111")
        );
        assert!(store.resolve_commit_prefix("fff").unwrap().is_none());
        assert!(store.resolve_commit_prefix("abc").is_err());
    }

    #[test]
    fn test_find_filters_and_window() {
        let mut store = LinkStore::open_in_memory().unwrap();
        touch(&mut store, "recent", &["src/Auth/Login.ts"], t0());
        touch(&mut store, "old", &["README.md"], t0() - Duration::days(20));

        let by_file = store
            .find_conversations(&ConversationFilter {
                file: Some("auth\\login".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_file.len(), 1);
        assert_eq!(by_file[0].id, "recent");

        let window = store
            .conversations_updated_between(&(t0() - Duration::days(14)), &t0())
            .unwrap();
        assert_eq!(window.len(), 1);

        store.upsert_commit(&commit("a1", &[], t0() - Duration::days(3))).unwrap();
        store.upsert_commit(&commit("a2", &[], t0())).unwrap();
        let since = store
            .find_commits(&CommitFilter {
                since: Some(t0() - Duration::days(1)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].hash, "a2");
    }

    #[test]
    fn test_file_context_direct_indirect_and_keyword() {
        let mut store = LinkStore::open_in_memory().unwrap();
        let mut update = ConversationUpdate::new("c1", Some("cursor"), "/work/app", "app", t0());
        update.relevant_files = Some(vec!["src/Login.tsx".into()]);
        update.searchable_text = Some("We fixed the login flicker by memoizing the hook".into());
        store.upsert_conversation(update).unwrap();
        touch(&mut store, "c2", &["web/src/login.tsx.bak"], t0());
        store.upsert_commit(&commit("abc", &["SRC\\login.tsx"], t0())).unwrap();

        let all = store.file_context("/src/login.tsx", None).unwrap();
        assert_eq!(all.conversations.len(), 2);
        assert_eq!(all.conversations[0].match_kind, MatchKind::Direct);
        assert_eq!(all.conversations[1].match_kind, MatchKind::Indirect);
        assert_eq!(all.commits.len(), 1);
        assert_eq!(all.commits[0].match_kind, MatchKind::Direct);

        let filtered = store.file_context("src/login.tsx", Some("FLICKER")).unwrap();
        assert_eq!(filtered.conversations.len(), 1);
        assert!(filtered.conversations[0].excerpts[0].contains("flicker"));
        assert_eq!(filtered.commits.len(), 1);

        assert!(store.file_context("   ", None).unwrap().conversations.is_empty());
        assert!(store.file_context("///", None).unwrap().commits.is_empty());
    }

    #[test]
    fn test_excerpts_are_bounded() {
        let text = format!("{} needle {} needle end", "x".repeat(100), "y".repeat(100));
        let found = excerpts(&text, "NEEDLE");
        assert_eq!(found.len(), 2);
        assert!(found[0].starts_with("..."));
        assert!(found[0].chars().count() <= 2 * EXCERPT_RADIUS + "needle".len() + 6);
        assert!(excerpts("short", "longer than text").is_empty());
    }

    #[test]
    fn test_with_store_creates_file_and_reopens() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("tether.db");

        with_store(&path, |store| {
            touch(store, "c1", &["a.ts"], t0());
            Ok(())
        })
        .unwrap();

        let failed: Result<()> = with_store(&path, |store| {
            touch(store, "c1", &["b.ts"], t0());
            anyhow::bail!("handler failed after write")
        });
        assert!(failed.is_err());

        let stats = with_store(&path, |store| store.stats()).unwrap();
        assert_eq!(stats.conversations, 1);
        let files = with_store(&path, |store| {
            Ok(store.get_conversation("c1")?.map(|c| c.captured_files))
        })
        .unwrap();
        assert_eq!(files, Some(vec!["a.ts".to_string(), "b.ts".to_string()]));
    }
}
