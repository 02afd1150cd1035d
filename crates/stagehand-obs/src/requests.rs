//! Typed wrappers over [`ControlSession::call`] for the request types the wall uses.

use crate::session::{ControlSession, RequestError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stagehand_core::control_proto::{RequestType, BROWSER_SOURCE_KIND};
use stagehand_core::layout::SlotGeometry;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntry {
    pub scene_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneList {
    #[serde(default)]
    pub current_program_scene_name: Option<String>,
    #[serde(default)]
    pub scenes: Vec<SceneEntry>,
}

impl SceneList {
    pub fn contains(&self, scene_name: &str) -> bool {
        self.scenes.iter().any(|scene| scene.scene_name == scene_name)
    }

    pub fn is_program(&self, scene_name: &str) -> bool {
        self.current_program_scene_name.as_deref() == Some(scene_name)
    }
}

/// Settings for a browser source rendering one room page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowserSourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub shutdown: bool,
    pub restart_when_active: bool,
}

impl BrowserSourceSettings {
    pub fn new(url: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            fps,
            shutdown: false,
            restart_when_active: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItem {
    pub scene_item_id: i64,
    pub source_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneItemList {
    #[serde(default)]
    scene_items: Vec<SceneItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTransform {
    pub position_x: f64,
    pub position_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl From<&SlotGeometry> for ItemTransform {
    fn from(geometry: &SlotGeometry) -> Self {
        Self {
            position_x: geometry.x,
            position_y: geometry.y,
            scale_x: geometry.scale_x,
            scale_y: geometry.scale_y,
        }
    }
}

fn decode<T: DeserializeOwned>(request_type: RequestType, data: Value) -> Result<T, RequestError> {
    serde_json::from_value(data).map_err(|err| RequestError::UnexpectedResponse {
        request_type,
        detail: err.to_string(),
    })
}

impl ControlSession {
    pub async fn list_scenes(&mut self) -> Result<SceneList, RequestError> {
        let data = self.call(RequestType::GetSceneList, None).await?;
        decode(RequestType::GetSceneList, data)
    }

    pub async fn create_scene(&mut self, scene_name: &str) -> Result<(), RequestError> {
        self.call(RequestType::CreateScene, Some(json!({ "sceneName": scene_name })))
            .await
            .map(|_| ())
    }

    pub async fn switch_scene(&mut self, scene_name: &str) -> Result<(), RequestError> {
        self.call(
            RequestType::SetCurrentProgramScene,
            Some(json!({ "sceneName": scene_name })),
        )
        .await
        .map(|_| ())
    }

    pub async fn create_browser_source(
        &mut self,
        scene_name: &str,
        source_name: &str,
        settings: &BrowserSourceSettings,
    ) -> Result<(), RequestError> {
        let data = json!({
            "sceneName": scene_name,
            "inputName": source_name,
            "inputKind": BROWSER_SOURCE_KIND,
            "inputSettings": settings,
            "sceneItemEnabled": true,
        });
        self.call(RequestType::CreateInput, Some(data))
            .await
            .map(|_| ())
    }

    pub async fn list_scene_items(&mut self, scene_name: &str) -> Result<Vec<SceneItem>, RequestError> {
        let data = self
            .call(
                RequestType::GetSceneItemList,
                Some(json!({ "sceneName": scene_name })),
            )
            .await?;
        let list: SceneItemList = decode(RequestType::GetSceneItemList, data)?;
        Ok(list.scene_items)
    }

    pub async fn set_item_transform(
        &mut self,
        scene_name: &str,
        scene_item_id: i64,
        transform: ItemTransform,
    ) -> Result<(), RequestError> {
        let data = json!({
            "sceneName": scene_name,
            "sceneItemId": scene_item_id,
            "sceneItemTransform": transform,
        });
        self.call(RequestType::SetSceneItemTransform, Some(data))
            .await
            .map(|_| ())
    }
}
