use serde::Deserialize;
use serde_json::Value;
use stagehand_core::viewer_count::CountFields;
use stagehand_core::{FetchError, LiveState, Room, RoomTarget};

const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Deserialize)]
struct LiveEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Option<LiveOuter>,
}

#[derive(Debug, Deserialize)]
struct LiveOuter {
    #[serde(default)]
    data: Option<LiveInner>,
}

#[derive(Debug, Deserialize)]
struct LiveInner {
    #[serde(default)]
    data: Option<Vec<LiveData>>,
    #[serde(default)]
    user: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct LiveData {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    id_str: Option<String>,
    #[serde(default)]
    user_count_str: Option<Value>,
    #[serde(default)]
    stats: Option<Value>,
    #[serde(default)]
    room_view_stats: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    nickname: Option<String>,
}

fn malformed(detail: &str) -> FetchError {
    FetchError::RequestFailed(format!("malformed payload: {detail}"))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn nested_text(container: Option<&Value>, key: &str) -> Option<String> {
    container
        .and_then(Value::as_object)
        .and_then(|map| map.get(key))
        .and_then(scalar_text)
}

/// Decodes one live-room response body into a [`Room`].
pub fn parse_live_payload(target: &RoomTarget, body: Value) -> Result<Room, FetchError> {
    let envelope: LiveEnvelope =
        serde_json::from_value(body).map_err(|err| malformed(&err.to_string()))?;
    if envelope.code != SUCCESS_CODE {
        return Err(FetchError::RoomClosed);
    }
    let inner = envelope
        .data
        .and_then(|outer| outer.data)
        .ok_or_else(|| malformed("missing data"))?;
    let live = match inner.data.and_then(|rooms| rooms.into_iter().next()) {
        Some(live) => live,
        None => return Err(FetchError::RoomClosed),
    };
    let nickname = inner
        .user
        .and_then(|user| user.nickname)
        .ok_or_else(|| malformed("missing user.nickname"))?;
    let title = live.title.ok_or_else(|| malformed("missing title"))?;
    let status = live.status.ok_or_else(|| malformed("missing status"))?;

    let precise = nested_text(live.stats.as_ref(), "user_count_str");
    let primary = live.user_count_str.as_ref().and_then(scalar_text);
    let count = CountFields {
        precise: precise.as_deref(),
        display_value: nested_text(live.room_view_stats.as_ref(), "display_value"),
        primary: primary.as_deref(),
    }
    .resolve();

    Ok(Room {
        id: target.webcast_id.clone(),
        url: target.url.clone(),
        nickname,
        title,
        viewers: count.value,
        viewers_display: count.display,
        live: LiveState::from_status_code(status),
        status_code: Some(status),
        remote_room_id: live.id_str,
        error: None,
    })
}

#[cfg(test)]
pub(crate) fn sample_body(live: Value) -> Value {
    serde_json::json!({
        "code": 200,
        "data": {"data": {"data": [live], "user": {"nickname": "小明"}}}
    })
}
