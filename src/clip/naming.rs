//! Output filename convention shared with the downstream folder scanner.
//!
//! ```text
//! <root>/clips/{timestamp}_{kind}_clip_{index}.mp4
//! <root>/captures/{timestamp}_{kind}_capture_{index}.jpg
//! ```
//!
//! A clip and its capture pair up by the identical `{timestamp}_{kind}` +
//! `{index}` parts. This layout is consumed bit-exact; do not change it.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;

pub const CLIPS_DIR: &str = "clips";
pub const CAPTURES_DIR: &str = "captures";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Paths for one materialization attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactNames {
    pub timestamp: String,
    pub clip_path: PathBuf,
    /// Temporary raw video written before re-encoding.
    pub raw_path: PathBuf,
    pub capture_path: PathBuf,
}

impl ArtifactNames {
    pub fn new(output_root: &Path, timestamp: &str, kind: &str, index: u64) -> Self {
        let kind = safe_filename(kind);
        let clip_stem = format!("{}_{}_clip_{}", timestamp, kind, index);
        let clips = output_root.join(CLIPS_DIR);
        Self {
            timestamp: timestamp.to_string(),
            clip_path: clips.join(format!("{}.mp4", clip_stem)),
            raw_path: clips.join(format!("{}_raw.rgb", clip_stem)),
            capture_path: output_root
                .join(CAPTURES_DIR)
                .join(format!("{}_{}_capture_{}.jpg", timestamp, kind, index)),
        }
    }
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Replace characters that are unsafe in filenames with `_`.
pub fn safe_filename(s: &str) -> String {
    static UNSAFE_RE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE_RE.get_or_init(|| Regex::new(r#"[\\/*?:"<>|{}]"#).unwrap());
    re.replace_all(s, "_").into_owned()
}

/// Web URL of an artifact: `base_url` + path relative to `output_root`.
pub fn web_url(base_url: &str, output_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(output_root).unwrap_or(path);
    let joined = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    if base_url.is_empty() || base_url.ends_with('/') {
        format!("{}{}", base_url, joined)
    } else {
        format!("{}/{}", base_url, joined)
    }
}
