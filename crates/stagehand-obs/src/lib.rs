pub mod requests;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use requests::{BrowserSourceSettings, ItemTransform, SceneItem, SceneList};
pub use session::{
    auth_response, ControlSession, RequestError, SessionConfig, SessionError, SessionState,
};
