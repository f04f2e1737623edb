//! Fetched component catalog plus the component currently open for detail.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::domain::{Category, Component, ComponentId};
use tracing::debug;

use crate::request::{RequestId, RequestTracker};

pub const FETCH_FALLBACK: &str = "Failed to fetch ingredients";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogState {
    pub items: Arc<Vec<Component>>,
    pub loading: bool,
    pub error: Option<String>,
    pub current: Option<Component>,
    request: RequestTracker,
}

impl CatalogState {
    pub fn find(&self, id: &ComponentId) -> Option<&Component> {
        self.items.iter().find(|component| &component.id == id)
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &Component> {
        self.items
            .iter()
            .filter(move |component| component.category == category)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CatalogCommand {
    FetchPending {
        request: RequestId,
    },
    FetchFulfilled {
        request: RequestId,
        items: Vec<Component>,
    },
    FetchRejected {
        request: RequestId,
        message: Option<String>,
    },
    SelectCurrent(ComponentId),
    ClearCurrent,
    #[serde(other)]
    Unrecognized,
}

pub fn reduce(state: &CatalogState, command: CatalogCommand) -> CatalogState {
    match command {
        // Existing items and selection stay visible while the refetch runs.
        CatalogCommand::FetchPending { request } => CatalogState {
            loading: true,
            error: None,
            request: state.request.begin(request),
            ..state.clone()
        },
        CatalogCommand::FetchFulfilled { request, items } => {
            if !state.request.is_current(request) {
                debug!(request = request.0, "catalog: ignoring stale fetch result");
                return state.clone();
            }
            CatalogState {
                items: Arc::new(items),
                loading: false,
                ..state.clone()
            }
        }
        CatalogCommand::FetchRejected { request, message } => {
            if !state.request.is_current(request) {
                debug!(request = request.0, "catalog: ignoring stale fetch failure");
                return state.clone();
            }
            CatalogState {
                loading: false,
                error: Some(message.unwrap_or_else(|| FETCH_FALLBACK.to_string())),
                ..state.clone()
            }
        }
        CatalogCommand::SelectCurrent(id) => CatalogState {
            current: state.find(&id).cloned(),
            ..state.clone()
        },
        CatalogCommand::ClearCurrent => CatalogState {
            current: None,
            ..state.clone()
        },
        CatalogCommand::Unrecognized => state.clone(),
    }
}
