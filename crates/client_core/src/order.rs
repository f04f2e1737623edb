//! Order submission state machine and the user's order history.
//!
//! The submission flow moves `Idle -> Submitting -> Fulfilled | Failed`
//! and returns to `Idle` on [`OrderCommand::Clear`]. History fetches run
//! beside it with their own loading flag and error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::domain::{Component, ComponentId, Order, OrderNumber};
use tracing::debug;

use crate::{
    assembly::AssemblyState,
    error::ValidationError,
    request::{RequestId, RequestTracker},
};

pub const SUBMIT_FALLBACK: &str = "Failed to create order";
pub const HISTORY_FALLBACK: &str = "Failed to fetch user orders";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPhase {
    #[default]
    Idle,
    Submitting,
    Fulfilled,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderState {
    pub phase: OrderPhase,
    pub current_order: Option<Order>,
    pub user_orders: Arc<Vec<Order>>,
    pub error: Option<String>,
    pub history_loading: bool,
    pub history_error: Option<String>,
    history_request: RequestTracker,
}

impl OrderState {
    pub fn loading(&self) -> bool {
        self.phase == OrderPhase::Submitting
    }

    /// Duplicate-submission guard. Returns the bill of materials to send
    /// when a submission may start right now.
    pub fn submission(
        &self,
        assembly: &AssemblyState,
    ) -> Result<Vec<ComponentId>, ValidationError> {
        if self.loading() {
            return Err(ValidationError::SubmissionInFlight);
        }
        assembly.materials().ok_or(ValidationError::MissingBase)
    }

    pub fn find(&self, number: OrderNumber) -> Option<&Order> {
        self.user_orders.iter().find(|order| order.number == number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OrderCommand {
    SubmitPending,
    SubmitFulfilled(Order),
    SubmitRejected {
        message: Option<String>,
    },
    HistoryPending {
        request: RequestId,
    },
    HistoryFulfilled {
        request: RequestId,
        orders: Vec<Order>,
    },
    HistoryRejected {
        request: RequestId,
        message: Option<String>,
    },
    /// Dismisses the confirmation (or the failure).
    Clear,
    /// Drops the signed-in user's history. A history fetch still in flight
    /// is discarded when it lands.
    ClearUserOrders,
    #[serde(other)]
    Unrecognized,
}

pub fn reduce(state: &OrderState, command: OrderCommand) -> OrderState {
    match command {
        OrderCommand::SubmitPending => OrderState {
            phase: OrderPhase::Submitting,
            current_order: None,
            error: None,
            ..state.clone()
        },
        OrderCommand::SubmitFulfilled(order) => {
            if state.phase != OrderPhase::Submitting {
                debug!(number = order.number.0, "order: result without a submission in flight");
                return state.clone();
            }
            OrderState {
                phase: OrderPhase::Fulfilled,
                current_order: Some(order),
                ..state.clone()
            }
        }
        OrderCommand::SubmitRejected { message } => {
            if state.phase != OrderPhase::Submitting {
                debug!("order: failure without a submission in flight");
                return state.clone();
            }
            OrderState {
                phase: OrderPhase::Failed,
                current_order: None,
                error: Some(message.unwrap_or_else(|| SUBMIT_FALLBACK.to_string())),
                ..state.clone()
            }
        }
        OrderCommand::HistoryPending { request } => OrderState {
            history_loading: true,
            history_error: None,
            history_request: state.history_request.begin(request),
            ..state.clone()
        },
        OrderCommand::HistoryFulfilled { request, orders } => {
            if !state.history_request.is_current(request) {
                debug!(request = request.0, "order: ignoring stale history result");
                return state.clone();
            }
            OrderState {
                history_loading: false,
                user_orders: Arc::new(orders),
                ..state.clone()
            }
        }
        OrderCommand::HistoryRejected { request, message } => {
            if !state.history_request.is_current(request) {
                debug!(request = request.0, "order: ignoring stale history failure");
                return state.clone();
            }
            OrderState {
                history_loading: false,
                history_error: Some(message.unwrap_or_else(|| HISTORY_FALLBACK.to_string())),
                ..state.clone()
            }
        }
        OrderCommand::Clear => OrderState {
            phase: match state.phase {
                OrderPhase::Fulfilled | OrderPhase::Failed => OrderPhase::Idle,
                phase => phase,
            },
            current_order: None,
            error: None,
            ..state.clone()
        },
        OrderCommand::ClearUserOrders => OrderState {
            user_orders: Arc::default(),
            history_loading: false,
            history_error: None,
            history_request: state.history_request.invalidate(),
            ..state.clone()
        },
        OrderCommand::Unrecognized => state.clone(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryLine {
    pub component: Component,
    pub count: usize,
}

/// An order resolved against the catalog for display.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSummary {
    pub order: Order,
    pub lines: Vec<SummaryLine>,
    pub total: u64,
}

impl OrderSummary {
    /// Groups repeated components in first-appearance order. Identifiers
    /// missing from the catalog are skipped. Returns `None` until the
    /// catalog has been loaded.
    pub fn build(order: &Order, catalog: &[Component]) -> Option<Self> {
        if catalog.is_empty() {
            return None;
        }

        let mut lines: Vec<SummaryLine> = Vec::new();
        for id in &order.ingredients {
            if let Some(line) = lines.iter_mut().find(|line| &line.component.id == id) {
                line.count += 1;
                continue;
            }
            if let Some(component) = catalog.iter().find(|component| &component.id == id) {
                lines.push(SummaryLine {
                    component: component.clone(),
                    count: 1,
                });
            }
        }

        let total = lines
            .iter()
            .map(|line| u64::from(line.component.price) * line.count as u64)
            .sum();
        Some(Self {
            order: order.clone(),
            lines,
            total,
        })
    }
}
