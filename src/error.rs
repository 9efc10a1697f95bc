//! Error types for failures that abort a single invocation
//!
//! Recoverable problems (malformed payloads, missing summaries, unresolvable
//! workspaces) never surface here; handlers degrade and carry on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("git did not report a commit hash in {0}")]
    MissingCommitHash(String),

    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },

    #[error("conversation not recorded: {0}")]
    UnknownConversation(String),

    #[error("commit not recorded: {0}")]
    UnknownCommit(String),

    #[error("commit prefix '{0}' is ambiguous")]
    AmbiguousCommit(String),
}
