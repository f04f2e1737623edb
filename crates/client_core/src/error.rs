use shared::domain::{Category, ComponentId};
use thiserror::Error;

use crate::channel::ChannelKey;

/// Guard refusals. These never reach a slice `error`; the action is simply
/// not performed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("component {component} is a {found}, expected {expected}")]
    InvalidCategory {
        component: ComponentId,
        expected: &'static str,
        found: Category,
    },
    #[error("an order needs a base before it can be submitted")]
    MissingBase,
    #[error("an order submission is already in flight")]
    SubmissionInFlight,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected request with status {status}")]
    Rejected { status: u16, message: Option<String> },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Human-readable message carried by the failure, if any. Slices fall
    /// back to a fixed string when this is `None`.
    pub fn message(&self) -> Option<String> {
        match self {
            ApiError::Transport(err) => Some(err.to_string()),
            ApiError::Rejected { message, .. } => message.clone(),
            ApiError::Decode(reason) => Some(reason.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("the user feed requires an access token")]
    MissingToken,
    #[error("failed to open {key} channel: {source}")]
    Open {
        key: ChannelKey,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed feed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("no access credential is available")]
    AuthAbsent,
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
