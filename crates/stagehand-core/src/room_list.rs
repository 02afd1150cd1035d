use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

pub const ROOM_HOST: &str = "live.douyin.com";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomTarget {
    pub webcast_id: String,
    pub url: String,
}

impl RoomTarget {
    pub fn from_webcast_id(webcast_id: &str) -> Self {
        Self {
            webcast_id: webcast_id.to_string(),
            url: canonical_room_url(webcast_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoomListError {
    #[error("failed to read room list {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no valid {host} urls in {}", path.display())]
    Empty { path: PathBuf, host: &'static str },
}

pub fn canonical_room_url(webcast_id: &str) -> String {
    format!("https://{ROOM_HOST}/{webcast_id}")
}

fn room_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"live\.douyin\.com/(\d+)").expect("valid regex"))
}

pub fn extract_webcast_id(url: &str) -> Option<String> {
    room_url_pattern()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Lines without the room host or a numeric id are skipped; later duplicates are dropped.
pub fn parse_room_list(text: &str) -> Vec<RoomTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || !line.contains(ROOM_HOST) {
            continue;
        }
        let Some(webcast_id) = extract_webcast_id(line) else {
            continue;
        };
        if seen.insert(webcast_id.clone()) {
            targets.push(RoomTarget::from_webcast_id(&webcast_id));
        }
    }
    targets
}

pub fn load_room_list(path: &Path) -> Result<Vec<RoomTarget>, RoomListError> {
    let text = std::fs::read_to_string(path).map_err(|source| RoomListError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let targets = parse_room_list(&text);
    if targets.is_empty() {
        return Err(RoomListError::Empty {
            path: path.to_path_buf(),
            host: ROOM_HOST,
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_valid_lines_and_skips_noise() {
        let text = "\
https://live.douyin.com/27356915698
  https://live.douyin.com/847308587035?enter_from=share

https://www.example.com/123
live.douyin.com/not-a-number
https://live.douyin.com/27356915698
";
        let targets = parse_room_list(text);
        let ids: Vec<&str> = targets.iter().map(|t| t.webcast_id.as_str()).collect();
        assert_eq!(ids, vec!["27356915698", "847308587035"]);
        assert_eq!(targets[1].url, "https://live.douyin.com/847308587035");
    }

    #[test]
    fn extract_requires_host_pattern() {
        assert_eq!(
            extract_webcast_id("https://live.douyin.com/858106419879"),
            Some("858106419879".to_string())
        );
        assert_eq!(extract_webcast_id("https://douyin.com/858106419879"), None);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_room_list(&dir.path().join("live_url.txt")).expect_err("missing file");
        assert!(matches!(err, RoomListError::Read { .. }));
    }

    #[test]
    fn load_rejects_file_without_rooms() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "https://example.com/1").expect("write");
        let err = load_room_list(file.path()).expect_err("no rooms");
        assert!(matches!(err, RoomListError::Empty { .. }));
    }

    #[test]
    fn load_reads_rooms() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "https://live.douyin.com/1").expect("write");
        writeln!(file, "https://live.douyin.com/2").expect("write");
        let targets = load_room_list(file.path()).expect("rooms");
        assert_eq!(targets.len(), 2);
    }
}
