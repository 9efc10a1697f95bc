//! Path normalization
//!
//! Two flavours live here:
//! - display/storage form: forward slashes, relative to a workspace root when possible
//! - match form: additionally lowercased with one leading slash stripped, used
//!   only for comparing file sets (auto-linking and file-context queries)

use std::path::{Path, PathBuf};

/// Directory entries that mark the root of a repository.
pub const REPO_MARKERS: &[&str] = &[".git", ".hg", ".svn"];

/// Convert backslashes to forward slashes.
pub fn to_forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize a path for set comparison.
///
/// `src\Foo.ts`, `/src/foo.ts` and `src/foo.ts` all map to `src/foo.ts`.
pub fn normalize_for_match(path: &str) -> String {
    let forward = to_forward_slashes(path.trim());
    let stripped = forward.strip_prefix('/').unwrap_or(&forward);
    stripped.to_lowercase()
}

/// Express `path` relative to `root` using forward slashes.
///
/// Paths outside the root (or already relative) are returned with separators
/// normalized but otherwise untouched.
pub fn relativize(path: &str, root: &Path) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        if let Ok(rel) = candidate.strip_prefix(root) {
            let rel = rel.to_string_lossy();
            if !rel.is_empty() {
                return to_forward_slashes(&rel);
            }
        }
    }

    // Fall back to a textual prefix match so Windows-style paths recorded on
    // another machine still relativize against a forward-slash root.
    let forward = to_forward_slashes(path);
    let root_forward = to_forward_slashes(&root.to_string_lossy());
    let root_forward = root_forward.trim_end_matches('/');
    if !root_forward.is_empty() {
        if let Some(rest) = forward.strip_prefix(root_forward) {
            if let Some(rest) = rest.strip_prefix('/') {
                if !rest.is_empty() {
                    return rest.to_string();
                }
            }
        }
    }
    forward
}

/// Walk up from `start` looking for a repository marker.
///
/// `start` may be a file (its parent is searched first) or a directory.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut current = if start.is_dir() {
        Some(start)
    } else {
        start.parent()
    };

    while let Some(dir) = current {
        if REPO_MARKERS.iter().any(|m| dir.join(m).exists()) {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Last path component of a workspace root, used as the project name.
pub fn project_name(root: &Path) -> String {
    root.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .unwrap_or_else(|| to_forward_slashes(&root.to_string_lossy()))
}

/// Deepest directory shared by every absolute path in `paths`.
pub fn common_ancestor<'a, I>(paths: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut common: Option<PathBuf> = None;
    for raw in paths {
        let path = Path::new(raw);
        if !path.is_absolute() {
            continue;
        }
        let dir = path.parent().unwrap_or(path).to_path_buf();
        common = Some(match common {
            None => dir,
            Some(prev) => {
                let mut shared = PathBuf::new();
                for (a, b) in prev.components().zip(dir.components()) {
                    if a != b {
                        break;
                    }
                    shared.push(a.as_os_str());
                }
                shared
            }
        });
    }
    common.filter(|p| p.parent().is_some())
}

/// Best guess at the workspace a set of absolute file paths belongs to: the
/// first repository root found above any of them, else their common ancestor.
pub fn infer_workspace_root(files: &[String]) -> Option<PathBuf> {
    let absolute: Vec<&str> = files
        .iter()
        .map(|f| f.as_str())
        .filter(|f| Path::new(f).is_absolute())
        .collect();

    absolute
        .iter()
        .find_map(|f| find_repo_root(Path::new(f)))
        .or_else(|| common_ancestor(absolute.iter().copied()))
}

/// Directory name Claude Code uses for a project path: every separator
/// becomes a literal dash.
pub fn dashed_project_dir(project_path: &str) -> String {
    to_forward_slashes(project_path)
        .trim_end_matches('/')
        .replace(['/', ':'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_is_separator_and_case_insensitive() {
        assert_eq!(normalize_for_match("src\\Foo.ts"), "src/foo.ts");
        assert_eq!(normalize_for_match("src/foo.ts"), "src/foo.ts");
        assert_eq!(normalize_for_match("/src/foo.ts"), "src/foo.ts");
    }

    #[test]
    fn test_normalize_strips_only_one_leading_slash() {
        assert_eq!(normalize_for_match("//share/x"), "/share/x");
    }

    #[test]
    fn test_relativize_inside_and_outside_root() {
        let root = Path::new("/work/repo");
        assert_eq!(relativize("/work/repo/src/a.rs", root), "src/a.rs");
        assert_eq!(relativize("/elsewhere/b.rs", root), "/elsewhere/b.rs");
        assert_eq!(relativize("src/c.rs", root), "src/c.rs");
    }

    #[test]
    fn test_relativize_windows_style_path() {
        let root = Path::new("C:/work/repo");
        assert_eq!(relativize("C:\\work\\repo\\src\\a.rs", root), "src/a.rs");
    }

    #[test]
    fn test_find_repo_root_walks_parents() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let nested = repo.join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        let file = nested.join("main.rs");
        std::fs::write(&file, "").unwrap();

        assert_eq!(find_repo_root(&file), Some(repo.clone()));
        assert_eq!(find_repo_root(&nested), Some(repo));
    }

    #[test]
    fn test_common_ancestor() {
        let paths = ["/a/b/c/x.rs", "/a/b/d/y.rs"];
        assert_eq!(common_ancestor(paths), Some(PathBuf::from("/a/b")));
        assert_eq!(common_ancestor(["relative/only.rs"]), None);
    }

    #[test]
    fn test_dashed_project_dir() {
        assert_eq!(dashed_project_dir("/Users/me/proj"), "-Users-me-proj");
        assert_eq!(dashed_project_dir("/Users/me/proj/"), "-Users-me-proj");
    }

    #[test]
    fn test_project_name() {
        assert_eq!(project_name(Path::new("/work/tether")), "tether");
    }
}
