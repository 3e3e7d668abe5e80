use std::fmt;

use engine::EngineError;
use formats::AssetFormatError;
use foundation::ScopeClosed;
use runtime::PoolClosed;

use crate::request::RequestError;

#[derive(Debug)]
pub enum SceneError {
    Engine(EngineError),
    Asset(AssetFormatError),
    Request(RequestError),
    UnknownObservation(String),
    /// An operation that needs `make()` ran before it.
    NotMade(&'static str),
    Decode { width: u32, height: u32, len: usize },
    PoolClosed,
    /// A render worker panicked; the scene it held is back in the pool.
    Worker(String),
}

impl SceneError {
    /// Errors caused by the request rather than the process state.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SceneError::UnknownObservation(_) | SceneError::Request(_))
    }
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneError::Engine(err) => write!(f, "engine error: {err}"),
            SceneError::Asset(err) => write!(f, "asset error: {err}"),
            SceneError::Request(err) => write!(f, "bad request: {err}"),
            SceneError::UnknownObservation(id) => write!(f, "unknown observation: {id}"),
            SceneError::NotMade(what) => write!(f, "{what} used before make()"),
            SceneError::Decode { width, height, len } => write!(
                f,
                "framebuffer of {len} bytes does not hold a {width}x{height} RGBA image"
            ),
            SceneError::PoolClosed => write!(f, "scene pool is closed"),
            SceneError::Worker(reason) => write!(f, "render worker failed: {reason}"),
        }
    }
}

impl std::error::Error for SceneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SceneError::Engine(err) => Some(err),
            SceneError::Asset(err) => Some(err),
            SceneError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EngineError> for SceneError {
    fn from(err: EngineError) -> Self {
        SceneError::Engine(err)
    }
}

impl From<AssetFormatError> for SceneError {
    fn from(err: AssetFormatError) -> Self {
        SceneError::Asset(err)
    }
}

impl From<RequestError> for SceneError {
    fn from(err: RequestError) -> Self {
        SceneError::Request(err)
    }
}

impl From<PoolClosed> for SceneError {
    fn from(_: PoolClosed) -> Self {
        SceneError::PoolClosed
    }
}

impl From<ScopeClosed> for SceneError {
    fn from(err: ScopeClosed) -> Self {
        SceneError::Engine(err.into())
    }
}
