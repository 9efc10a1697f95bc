//! SQLite schema for the link store
//!
//! Additive only: every statement is `IF NOT EXISTS`, nothing is ever
//! dropped or rewritten. There is no cascading delete; rows are merged or
//! replaced, never removed.

pub const SCHEMA: &str = r#"
-- ============================================
-- CONVERSATIONS
-- ============================================

-- One row per assistant conversation seen by a hook
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,                   -- Source conversation/session id
    agent TEXT NOT NULL,                   -- 'cursor', 'claude-code', ...
    workspace_root TEXT NOT NULL,
    project_name TEXT NOT NULL,
    title TEXT,                            -- Coalesced on write
    summary TEXT,                          -- Coalesced on write
    ai_summary TEXT,                       -- Coalesced on write
    searchable_text TEXT,                  -- Coalesced on write
    relevant_files TEXT NOT NULL DEFAULT '[]',   -- JSON array, replaced
    attached_folders TEXT NOT NULL DEFAULT '[]', -- JSON array, replaced
    captured_files TEXT NOT NULL DEFAULT '[]',   -- JSON array, unioned
    created_at TEXT NOT NULL,              -- Set once
    updated_at TEXT NOT NULL,              -- Only advances
    last_hook_event TEXT
);

-- ============================================
-- COMMITS
-- ============================================

CREATE TABLE IF NOT EXISTS commits (
    hash TEXT PRIMARY KEY,                 -- Full hash, never truncated
    repo_path TEXT NOT NULL,
    branch TEXT,
    author TEXT,
    message TEXT NOT NULL DEFAULT '',
    committed_at TEXT NOT NULL,
    changed_files TEXT NOT NULL DEFAULT '[]',    -- JSON array, ordered
    created_at TEXT NOT NULL
);

-- ============================================
-- LINKS
-- ============================================

-- Exactly one live link per (conversation, commit) pair
CREATE TABLE IF NOT EXISTS conversation_commit_links (
    id INTEGER PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    commit_hash TEXT NOT NULL,
    matched_files TEXT NOT NULL DEFAULT '[]',    -- JSON array, normalized paths
    confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
    status TEXT NOT NULL CHECK (status IN ('auto', 'manual')),
    created_at TEXT NOT NULL,
    UNIQUE(conversation_id, commit_hash),
    FOREIGN KEY(conversation_id) REFERENCES conversations(id),
    FOREIGN KEY(commit_hash) REFERENCES commits(hash)
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_conversations_workspace ON conversations(workspace_root);
CREATE INDEX IF NOT EXISTS idx_conversations_agent ON conversations(agent);

CREATE INDEX IF NOT EXISTS idx_commits_repo ON commits(repo_path);
CREATE INDEX IF NOT EXISTS idx_commits_committed ON commits(committed_at DESC);

CREATE INDEX IF NOT EXISTS idx_links_conversation ON conversation_commit_links(conversation_id);
CREATE INDEX IF NOT EXISTS idx_links_commit ON conversation_commit_links(commit_hash);
"#;
