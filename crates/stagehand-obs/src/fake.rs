//! In-process control-protocol server for tests.
//!
//! Keeps a small model of scenes, inputs and scene items so helpers and the
//! reconciliation loop can be exercised end to end over a real socket.

use crate::session::auth_response;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use stagehand_core::control_proto::{
    decode_frame, encode_frame, Announce, AuthChallenge, ControlMsg, HelloAck, RequestFrame,
    RequestStatus, ResponseFrame, DEFAULT_MAX_FRAME_BYTES, RPC_VERSION, STATUS_RESOURCE_ALREADY_EXISTS,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use url::Url;

const FAKE_SERVER_VERSION: &str = "5.0.0-fake";
const FAKE_SALT: &str = "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=";
const FAKE_CHALLENGE: &str = "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=";
const STATUS_SUCCESS: i64 = 100;
const STATUS_MISSING_FIELD: i64 = 300;
const STATUS_RESOURCE_NOT_FOUND: i64 = 600;
const STATUS_PROCESSING_FAILED: i64 = 702;
const STATUS_UNKNOWN_REQUEST: i64 = 204;

#[derive(Debug, Clone)]
pub struct FakeObsOptions {
    /// Greet new connections at all.
    pub acknowledge: bool,
    pub rpc_version: u32,
    pub password: Option<String>,
    /// Request types that never get a response.
    pub silent_requests: HashSet<String>,
    /// Request types answered with an undecodable frame.
    pub garbage_requests: HashSet<String>,
    /// Request types answered with a failed status.
    pub rejected_requests: HashSet<String>,
    /// Response data returned verbatim instead of the modeled answer.
    pub scripted_data: HashMap<String, Value>,
    /// Precede each response with an event and a response for another id.
    pub stale_responses: bool,
}

impl Default for FakeObsOptions {
    fn default() -> Self {
        Self {
            acknowledge: true,
            rpc_version: RPC_VERSION,
            password: None,
            silent_requests: HashSet::new(),
            garbage_requests: HashSet::new(),
            rejected_requests: HashSet::new(),
            scripted_data: HashMap::new(),
            stale_responses: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub request_type: String,
    pub request_id: String,
    pub data: Value,
}

#[derive(Debug, Clone)]
struct FakeItem {
    id: i64,
    source_name: String,
    transform: Option<Value>,
}

type Outcome = Result<Option<Value>, (i64, String)>;

enum Reply {
    Silent,
    Garbage,
    Frame { stale: bool, response: ResponseFrame },
}

#[derive(Debug)]
struct FakeState {
    options: FakeObsOptions,
    requests: Vec<RecordedRequest>,
    announces: Vec<Announce>,
    scenes: Vec<String>,
    program_scene: Option<String>,
    items: BTreeMap<String, Vec<FakeItem>>,
    inputs: BTreeMap<String, Value>,
    next_item_id: i64,
    connections: usize,
}

impl FakeState {
    fn new(options: FakeObsOptions) -> Self {
        Self {
            options,
            requests: Vec::new(),
            announces: Vec::new(),
            scenes: Vec::new(),
            program_scene: None,
            items: BTreeMap::new(),
            inputs: BTreeMap::new(),
            next_item_id: 1,
            connections: 0,
        }
    }

    fn reply_to(&mut self, request: &RequestFrame) -> Reply {
        let kind = request.request_type.as_str();
        if self.options.silent_requests.contains(kind) {
            return Reply::Silent;
        }
        if self.options.garbage_requests.contains(kind) {
            return Reply::Garbage;
        }
        let data = request.request_data.clone().unwrap_or(Value::Null);
        let outcome = if self.options.rejected_requests.contains(kind) {
            Err((STATUS_PROCESSING_FAILED, format!("{kind} rejected by fixture")))
        } else if let Some(scripted) = self.options.scripted_data.get(kind) {
            Ok(Some(scripted.clone()))
        } else {
            self.apply(kind, &data)
        };
        let (request_status, response_data) = match outcome {
            Ok(response_data) => (
                RequestStatus {
                    result: true,
                    code: STATUS_SUCCESS,
                    comment: None,
                },
                response_data,
            ),
            Err((code, comment)) => (
                RequestStatus {
                    result: false,
                    code,
                    comment: Some(comment),
                },
                None,
            ),
        };
        Reply::Frame {
            stale: self.options.stale_responses,
            response: ResponseFrame {
                request_type: kind.to_string(),
                request_id: request.request_id.clone(),
                request_status,
                response_data,
            },
        }
    }

    fn apply(&mut self, kind: &str, data: &Value) -> Outcome {
        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or((STATUS_MISSING_FIELD, format!("missing {key}")))
        };
        match kind {
            "GetSceneList" => {
                let scenes: Vec<Value> = self
                    .scenes
                    .iter()
                    .enumerate()
                    .map(|(index, name)| json!({"sceneIndex": index, "sceneName": name}))
                    .collect();
                Ok(Some(json!({
                    "currentProgramSceneName": self.program_scene,
                    "scenes": scenes,
                })))
            }
            "CreateScene" => {
                let scene = text("sceneName")?;
                if self.scenes.contains(&scene) {
                    return Err((
                        STATUS_RESOURCE_ALREADY_EXISTS,
                        format!("scene {scene} already exists"),
                    ));
                }
                self.scenes.push(scene);
                Ok(None)
            }
            "SetCurrentProgramScene" => {
                let scene = self.existing_scene(text("sceneName")?)?;
                self.program_scene = Some(scene);
                Ok(None)
            }
            "CreateInput" => {
                let scene = self.existing_scene(text("sceneName")?)?;
                let input = text("inputName")?;
                if self.inputs.contains_key(&input) {
                    return Err((
                        STATUS_RESOURCE_ALREADY_EXISTS,
                        format!("input {input} already exists"),
                    ));
                }
                let settings = data.get("inputSettings").cloned().unwrap_or(Value::Null);
                self.inputs.insert(input.clone(), settings);
                let id = self.next_item_id;
                self.next_item_id += 1;
                self.items.entry(scene).or_default().push(FakeItem {
                    id,
                    source_name: input,
                    transform: None,
                });
                Ok(Some(json!({"sceneItemId": id})))
            }
            "GetSceneItemList" => {
                let scene = self.existing_scene(text("sceneName")?)?;
                let items: Vec<Value> = self
                    .items
                    .get(&scene)
                    .map(|items| {
                        items
                            .iter()
                            .enumerate()
                            .map(|(index, item)| {
                                json!({
                                    "sceneItemId": item.id,
                                    "sceneItemIndex": index,
                                    "sourceName": item.source_name,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Some(json!({"sceneItems": items})))
            }
            "SetSceneItemTransform" => {
                let scene = self.existing_scene(text("sceneName")?)?;
                let id = data
                    .get("sceneItemId")
                    .and_then(Value::as_i64)
                    .ok_or((STATUS_MISSING_FIELD, "missing sceneItemId".to_string()))?;
                let item = self
                    .items
                    .get_mut(&scene)
                    .and_then(|items| items.iter_mut().find(|item| item.id == id))
                    .ok_or((STATUS_RESOURCE_NOT_FOUND, format!("no scene item {id}")))?;
                item.transform = data.get("sceneItemTransform").cloned();
                Ok(None)
            }
            other => Err((STATUS_UNKNOWN_REQUEST, format!("unknown request type {other}"))),
        }
    }

    fn existing_scene(&self, scene: String) -> Result<String, (i64, String)> {
        if self.scenes.contains(&scene) {
            Ok(scene)
        } else {
            Err((STATUS_RESOURCE_NOT_FOUND, format!("no scene {scene}")))
        }
    }
}

pub struct FakeObs {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    kick: watch::Sender<u64>,
    task: JoinHandle<()>,
}

impl FakeObs {
    pub async fn start(options: FakeObsOptions) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(FakeState::new(options)));
        let (kick, _) = watch::channel(0u64);
        let shared = state.clone();
        let kicks = kick.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = shared.clone();
                let kicked = kicks.subscribe();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, shared, kicked).await;
                });
            }
        });
        Ok(Self {
            addr,
            state,
            kick,
            task,
        })
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("ws://{}", self.addr)).expect("loopback url")
    }

    pub async fn update_options(&self, update: impl FnOnce(&mut FakeObsOptions)) {
        update(&mut self.state.lock().await.options);
    }

    pub async fn seed_scene(&self, scene: &str) {
        let mut state = self.state.lock().await;
        if !state.scenes.iter().any(|name| name == scene) {
            state.scenes.push(scene.to_string());
        }
    }

    /// Closes every open connection, as a restarting server would.
    pub async fn disconnect_all(&self) {
        self.kick.send_modify(|generation| *generation += 1);
    }

    pub async fn connections(&self) -> usize {
        self.state.lock().await.connections
    }

    /// Announcements received during handshakes, in arrival order.
    pub async fn announces(&self) -> Vec<Announce> {
        self.state.lock().await.announces.clone()
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    pub async fn request_types(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .requests
            .iter()
            .map(|request| request.request_type.clone())
            .collect()
    }

    pub async fn clear_requests(&self) {
        self.state.lock().await.requests.clear();
    }

    pub async fn scenes(&self) -> Vec<String> {
        self.state.lock().await.scenes.clone()
    }

    pub async fn program_scene(&self) -> Option<String> {
        self.state.lock().await.program_scene.clone()
    }

    pub async fn inputs(&self) -> Vec<String> {
        self.state.lock().await.inputs.keys().cloned().collect()
    }

    pub async fn input_settings(&self, input: &str) -> Option<Value> {
        self.state.lock().await.inputs.get(input).cloned()
    }

    pub async fn transform_of(&self, scene: &str, source: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .items
            .get(scene)?
            .iter()
            .find(|item| item.source_name == source)?
            .transform
            .clone()
    }
}

impl Drop for FakeObs {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<Mutex<FakeState>>,
    mut kicked: watch::Receiver<u64>,
) -> Result<(), tungstenite::Error> {
    let mut ws = accept_async(stream).await?;
    let generation = *kicked.borrow_and_update();
    let options = {
        let mut state = state.lock().await;
        state.connections += 1;
        state.options.clone()
    };

    if !options.acknowledge {
        while next_frame(&mut ws).await.is_some() {}
        return Ok(());
    }
    let authentication = options.password.as_ref().map(|_| AuthChallenge {
        challenge: FAKE_CHALLENGE.to_string(),
        salt: FAKE_SALT.to_string(),
    });
    send(
        &mut ws,
        ControlMsg::HelloAck(HelloAck {
            rpc_version: options.rpc_version,
            server_version: Some(FAKE_SERVER_VERSION.to_string()),
            authentication,
        }),
    )
    .await?;

    let announce = match next_frame(&mut ws).await {
        Some(ControlMsg::Announce(announce)) => announce,
        _ => return Ok(()),
    };
    state.lock().await.announces.push(announce.clone());
    if let Some(password) = &options.password {
        let expected = auth_response(password, FAKE_SALT, FAKE_CHALLENGE);
        if announce.authentication.as_deref() != Some(expected.as_str()) {
            let _ = ws.close(None).await;
            return Ok(());
        }
    }
    send(
        &mut ws,
        ControlMsg::Identified(json!({"negotiatedRpcVersion": options.rpc_version})),
    )
    .await?;

    loop {
        let msg = tokio::select! {
            msg = next_frame(&mut ws) => msg,
            _ = kicked.changed() => None,
        };
        let Some(msg) = msg else {
            break;
        };
        let ControlMsg::Request(request) = msg else {
            continue;
        };
        if *kicked.borrow() != generation {
            break;
        }
        let reply = {
            let mut state = state.lock().await;
            state.requests.push(RecordedRequest {
                request_type: request.request_type.clone(),
                request_id: request.request_id.clone(),
                data: request.request_data.clone().unwrap_or(Value::Null),
            });
            state.reply_to(&request)
        };
        match reply {
            Reply::Silent => {}
            Reply::Garbage => ws.send(Message::Text("{\"op\":7,\"d\":".to_string())).await?,
            Reply::Frame { stale, response } => {
                if stale {
                    send(
                        &mut ws,
                        ControlMsg::Event(json!({"eventType": "CurrentProgramSceneChanged"})),
                    )
                    .await?;
                    let mut late = response.clone();
                    late.request_id = format!("late-{}", response.request_id);
                    send(&mut ws, ControlMsg::Response(late)).await?;
                }
                send(&mut ws, ControlMsg::Response(response)).await?;
            }
        }
    }
    let _ = ws.close(None).await;
    Ok(())
}

async fn send(ws: &mut WebSocketStream<TcpStream>, msg: ControlMsg) -> Result<(), tungstenite::Error> {
    match encode_frame(msg, DEFAULT_MAX_FRAME_BYTES) {
        Ok(text) => ws.send(Message::Text(text)).await,
        Err(_) => Ok(()),
    }
}

async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Option<ControlMsg> {
    loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => {
                if let Ok(msg) = decode_frame(&text, DEFAULT_MAX_FRAME_BYTES) {
                    return Some(msg);
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}
