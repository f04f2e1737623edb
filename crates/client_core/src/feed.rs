//! Live order lists. The same slice shape backs both the public feed and
//! the signed-in user's own feed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::{
    domain::{Order, OrderNumber},
    protocol::FeedFrame,
};
use tracing::debug;

use crate::request::{RequestId, RequestTracker};

pub const FETCH_FALLBACK: &str = "Failed to fetch feeds";
pub const CONNECT_FALLBACK: &str = "Failed to connect to order feed";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub orders: Arc<Vec<Order>>,
    pub total: u64,
    pub total_today: u64,
    pub loading: bool,
    pub error: Option<String>,
    /// Whether a live connection is currently delivering into this slice.
    pub connected: bool,
    request: RequestTracker,
    resets: u64,
}

impl FeedState {
    pub fn find(&self, number: OrderNumber) -> Option<&Order> {
        self.orders.iter().find(|order| order.number == number)
    }

    /// Number of `Reset`s applied so far.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    fn with_frame(&self, frame: FeedFrame) -> Self {
        Self {
            orders: Arc::new(frame.orders),
            total: frame.total.unwrap_or(self.total),
            total_today: frame.total_today.unwrap_or(self.total_today),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FeedCommand {
    FetchPending {
        request: RequestId,
    },
    FetchFulfilled {
        request: RequestId,
        frame: FeedFrame,
    },
    FetchRejected {
        request: RequestId,
        message: Option<String>,
    },
    /// Live data from the channel; deliberately outside the fetch lifecycle.
    ReplaceData(FeedFrame),
    ChannelOpened,
    ChannelClosed,
    ChannelFailed {
        message: Option<String>,
    },
    /// Empties the slice, e.g. when the user it belongs to signs out.
    Reset,
    #[serde(other)]
    Unrecognized,
}

pub fn reduce(state: &FeedState, command: FeedCommand) -> FeedState {
    match command {
        FeedCommand::FetchPending { request } => FeedState {
            loading: true,
            error: None,
            request: state.request.begin(request),
            ..state.clone()
        },
        FeedCommand::FetchFulfilled { request, frame } => {
            if !state.request.is_current(request) {
                debug!(request = request.0, "feed: ignoring stale fetch result");
                return state.clone();
            }
            FeedState {
                loading: false,
                ..state.with_frame(frame)
            }
        }
        FeedCommand::FetchRejected { request, message } => {
            if !state.request.is_current(request) {
                debug!(request = request.0, "feed: ignoring stale fetch failure");
                return state.clone();
            }
            FeedState {
                loading: false,
                error: Some(message.unwrap_or_else(|| FETCH_FALLBACK.to_string())),
                ..state.clone()
            }
        }
        FeedCommand::ReplaceData(frame) => state.with_frame(frame),
        FeedCommand::ChannelOpened => FeedState {
            connected: true,
            error: None,
            ..state.clone()
        },
        FeedCommand::ChannelClosed => FeedState {
            connected: false,
            ..state.clone()
        },
        FeedCommand::ChannelFailed { message } => FeedState {
            connected: false,
            error: Some(message.unwrap_or_else(|| CONNECT_FALLBACK.to_string())),
            ..state.clone()
        },
        FeedCommand::Reset => FeedState {
            request: state.request.invalidate(),
            resets: state.resets + 1,
            ..FeedState::default()
        },
        FeedCommand::Unrecognized => state.clone(),
    }
}
