//! Shared helpers with no state: path normalization and time arithmetic

pub mod path;
pub mod time;

pub use path::{
    common_ancestor, dashed_project_dir, find_repo_root, infer_workspace_root,
    normalize_for_match, project_name, relativize, to_forward_slashes,
};
pub use time::{
    days_between, format_timestamp, ms_to_datetime, parse_timestamp, parse_timestamp_str, recency,
};
