pub mod control_proto;
pub mod layout;
pub mod room_list;
pub mod viewer_count;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use room_list::RoomTarget;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LiveState {
    Live,
    Offline,
    #[default]
    Unknown,
}

impl LiveState {
    /// Maps the ranking API's numeric room status.
    pub fn from_status_code(code: i64) -> Self {
        match code {
            2 => LiveState::Live,
            0 | 4 => LiveState::Offline,
            _ => LiveState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LiveState::Live => "live",
            LiveState::Offline => "offline",
            LiveState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LiveState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "live" => Ok(LiveState::Live),
            "offline" => Ok(LiveState::Offline),
            "unknown" => Ok(LiveState::Unknown),
            other => Err(format!("Unknown live state: {other}")),
        }
    }
}

/// Finer-grained label for the rendered table; 4 is a replay, 0 has not started.
pub fn status_label(status_code: Option<i64>) -> &'static str {
    match status_code {
        Some(2) => "live",
        Some(4) => "replay",
        Some(0) => "idle",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    #[error("room closed")]
    RoomClosed,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

impl FetchError {
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::RoomClosed => "ROOM_CLOSED",
            FetchError::RequestFailed(_) => "REQUEST_FAILED",
            FetchError::ConnectionFailed(_) => "CONNECTION_FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewers: u64,
    #[serde(default)]
    pub viewers_display: String,
    #[serde(default)]
    pub live: LiveState,
    #[serde(default)]
    pub status_code: Option<i64>,
    #[serde(default)]
    pub remote_room_id: Option<String>,
    #[serde(default)]
    pub error: Option<FetchError>,
}

impl Room {
    pub fn failed(target: &RoomTarget, error: FetchError) -> Self {
        Self {
            id: target.webcast_id.clone(),
            url: target.url.clone(),
            nickname: String::new(),
            title: String::new(),
            viewers: 0,
            viewers_display: "--".to_string(),
            live: LiveState::Unknown,
            status_code: None,
            remote_room_id: None,
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Failed rooms are listed in the table but never given a slot.
    pub fn is_placeable(&self) -> bool {
        !self.is_failed()
    }

    pub fn source_name(&self) -> String {
        source_name_for(&self.id)
    }

    pub fn display_name(&self) -> &str {
        if self.nickname.trim().is_empty() {
            &self.id
        } else {
            &self.nickname
        }
    }

    fn rank_key(&self) -> i128 {
        if self.is_failed() {
            -1
        } else {
            i128::from(self.viewers)
        }
    }
}

pub fn source_name_for(room_id: &str) -> String {
    format!("live_{room_id}")
}

/// Rooms ordered by descending viewer count; input order breaks ties and failed
/// fetches sink to the bottom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankedRoomList {
    rooms: Vec<Room>,
}

impl RankedRoomList {
    pub fn from_rooms(rooms: Vec<Room>) -> Self {
        let mut seen = HashSet::new();
        let mut rooms: Vec<Room> = rooms
            .into_iter()
            .filter(|room| seen.insert(room.id.clone()))
            .collect();
        // sort_by is stable, equal keys keep their input order
        rooms.sort_by(|a, b| b.rank_key().cmp(&a.rank_key()));
        Self { rooms }
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter()
    }

    pub fn placeable(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter().filter(|room| room.is_placeable())
    }

    /// Most popular room that is currently broadcasting.
    pub fn top_live(&self) -> Option<&Room> {
        self.placeable().find(|room| room.live == LiveState::Live)
    }

    pub fn succeeded(&self) -> usize {
        self.placeable().count()
    }

    pub fn total_viewers(&self) -> u64 {
        self.placeable().map(|room| room.viewers).sum()
    }
}
