//! Thin wrappers over the `git` executable

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::error::TetherError;
use crate::store::CommitRecord;
use crate::util::{parse_timestamp_str, to_forward_slashes};

/// Run `git <args>` in `repo` and return trimmed stdout
pub fn run_git(repo: &Path, args: &[&str]) -> Result<String> {
    let command = args.join(" ");
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| TetherError::Git {
            command: command.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TetherError::Git {
            command,
            message: stderr.trim().to_string(),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Top level of the work tree containing `start`, if any
pub fn repo_root(start: &Path) -> Option<PathBuf> {
    match run_git(start, &["rev-parse", "--show-toplevel"]) {
        Ok(top) if !top.is_empty() => Some(PathBuf::from(top)),
        Ok(_) => None,
        Err(e) => {
            debug!(start = %start.display(), "not inside a git work tree: {e:#}");
            None
        }
    }
}

/// Author line, commit time and message from `git log -1` output
#[derive(Debug, PartialEq)]
struct LogEntry {
    author: Option<String>,
    committed_at: Option<DateTime<Utc>>,
    message: String,
}

const LOG_FORMAT: &str = "--format=%an <%ae>%x00%cI%x00%B";

fn parse_log(raw: &str) -> LogEntry {
    let mut parts = raw.splitn(3, '\0');
    let author = parts
        .next()
        .map(str::trim)
        .filter(|a| !a.is_empty() && *a != "<>")
        .map(String::from);
    let committed_at = parts.next().and_then(|ts| parse_timestamp_str(ts.trim()));
    let message = parts.next().unwrap_or("").trim().to_string();
    LogEntry {
        author,
        committed_at,
        message,
    }
}

/// NUL-separated `diff-tree -z` output; paths arrive unquoted
fn parse_changed_files(raw: &str) -> Vec<String> {
    raw.split('\0')
        .filter(|p| !p.is_empty())
        .map(to_forward_slashes)
        .collect()
}

/// Paths `hash` changed relative to its first parent, or every path it
/// added when it is a root commit
fn changed_files(repo: &Path, hash: &str) -> Result<Vec<String>> {
    let first_parent = run_git(repo, &["rev-parse", "--verify", "-q", &format!("{hash}^1")])
        .ok()
        .filter(|p| !p.is_empty());
    let mut args = vec!["-c", "core.quotepath=off", "diff-tree", "-r", "-z", "--name-only"];
    match first_parent.as_deref() {
        Some(parent) => args.extend([parent, hash]),
        None => args.extend(["--root", "--no-commit-id", hash]),
    }
    let files = parse_changed_files(&run_git(repo, &args)?);
    if files.is_empty() {
        debug!(%hash, parent = ?first_parent, "commit changed no files");
    }
    Ok(files)
}

fn parse_branch(raw: &str) -> Option<String> {
    let branch = raw.trim();
    // Detached heads report the literal "HEAD"
    (!branch.is_empty() && branch != "HEAD").then(|| branch.to_string())
}

/// Read everything the store keeps about `rev` in `repo`
pub fn read_commit(repo: &Path, rev: &str, now: DateTime<Utc>) -> Result<CommitRecord> {
    let hash = run_git(repo, &["rev-parse", "--verify", &format!("{rev}^{{commit}}")])?;
    if hash.is_empty() {
        return Err(TetherError::MissingCommitHash(repo.display().to_string()).into());
    }

    let branch = run_git(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
        .ok()
        .and_then(|b| parse_branch(&b));
    let log = parse_log(&run_git(repo, &["log", "-1", LOG_FORMAT, &hash])?);
    let changed_files = changed_files(repo, &hash)?;

    debug!(%hash, files = changed_files.len(), "read commit");
    Ok(CommitRecord {
        hash,
        repo_path: to_forward_slashes(&repo.to_string_lossy()),
        branch,
        author: log.author,
        message: log.message,
        committed_at: log.committed_at.unwrap_or(now),
        changed_files,
        created_at: now,
    })
}
