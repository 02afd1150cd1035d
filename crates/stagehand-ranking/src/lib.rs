pub mod payload;

use futures_util::future::join_all;
use reqwest::StatusCode;
use serde_json::Value;
use stagehand_core::{FetchError, RankedRoomList, Room, RoomTarget};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/douyin/web/fetch_user_live_videos";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything that can report the current state of one monitored room.
pub trait RankingSource {
    fn fetch(&self, target: &RoomTarget) -> impl Future<Output = Result<Room, FetchError>> + Send;
}

pub struct HttpRankingSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRankingSource {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl RankingSource for HttpRankingSource {
    async fn fetch(&self, target: &RoomTarget) -> Result<Room, FetchError> {
        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[("webcast_id", target.webcast_id.as_str())])
            .send()
            .await
            .map_err(|err| FetchError::ConnectionFailed(err.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::RequestFailed(format!("http {}", status.as_u16())));
        }
        let body: Value = response.json().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::ConnectionFailed(err.to_string())
            } else {
                FetchError::RequestFailed(format!("malformed payload: {err}"))
            }
        })?;
        payload::parse_live_payload(target, body)
    }
}

/// Fetches every target concurrently and ranks the results; failures become failed rooms.
pub async fn fetch_ranked<S: RankingSource>(source: &S, targets: &[RoomTarget]) -> RankedRoomList {
    let fetches = targets.iter().map(|target| async move {
        match source.fetch(target).await {
            Ok(room) => {
                debug!(
                    "room_fetched: id={} viewers={} live={}",
                    room.id, room.viewers, room.live
                );
                room
            }
            Err(err) => {
                warn!(
                    "room_fetch_error: id={} category={} {err}",
                    target.webcast_id,
                    err.category()
                );
                Room::failed(target, err)
            }
        }
    });
    RankedRoomList::from_rooms(join_all(fetches).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode as AxumStatus, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        addr
    }

    async fn live_handler(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
        let id = query.get("webcast_id").cloned().unwrap_or_default();
        let count = match id.as_str() {
            "1" => "500",
            "2" => "300+",
            _ => "7",
        };
        Json(payload::sample_body(json!({
            "title": format!("room {id}"),
            "status": 2,
            "id_str": format!("r{id}"),
            "user_count_str": count,
        })))
    }

    fn source_for(addr: SocketAddr, path: &str) -> HttpRankingSource {
        let url = Url::parse(&format!("http://{addr}{path}")).expect("url");
        HttpRankingSource::new(url, Duration::from_secs(2)).expect("client")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetches_room_over_http() {
        let addr = serve(Router::new().route("/live", get(live_handler))).await;
        let source = source_for(addr, "/live");
        let room = source
            .fetch(&RoomTarget::from_webcast_id("2"))
            .await
            .expect("room");
        assert_eq!(room.viewers, 300);
        assert_eq!(room.title, "room 2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_200_status_is_request_failure() {
        let router = Router::new().route(
            "/live",
            get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "busy") }),
        );
        let addr = serve(router).await;
        let err = source_for(addr, "/live")
            .fetch(&RoomTarget::from_webcast_id("1"))
            .await
            .expect_err("503");
        assert_eq!(err, FetchError::RequestFailed("http 503".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_json_body_is_request_failure() {
        let router = Router::new().route("/live", get(|| async { "<html>oops</html>" }));
        let addr = serve(router).await;
        let err = source_for(addr, "/live")
            .fetch(&RoomTarget::from_webcast_id("1"))
            .await
            .expect_err("html");
        assert!(matches!(err, FetchError::RequestFailed(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_endpoint_is_connection_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let err = source_for(addr, "/live")
            .fetch(&RoomTarget::from_webcast_id("1"))
            .await
            .expect_err("refused");
        assert!(matches!(err, FetchError::ConnectionFailed(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetch_ranked_orders_rooms_and_keeps_failures() {
        let addr = serve(Router::new().route("/live", get(live_handler))).await;
        let source = source_for(addr, "/live");
        let mut targets = vec![
            RoomTarget::from_webcast_id("2"),
            RoomTarget::from_webcast_id("1"),
        ];
        let broken = HttpRankingSource::new(
            Url::parse(&format!("http://{addr}/missing")).expect("url"),
            Duration::from_secs(2),
        )
        .expect("client");
        let ranked = fetch_ranked(&source, &targets).await;
        let ids: Vec<&str> = ranked.iter().map(|room| room.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);

        targets.push(RoomTarget::from_webcast_id("3"));
        let failed = fetch_ranked(&broken, &targets).await;
        assert_eq!(failed.len(), 3);
        assert!(failed.iter().all(Room::is_failed));
    }
}
