//! Composition root.
//!
//! The [`Coordinator`] owns the state tree and the channel manager. UI
//! commands go through [`Coordinator::dispatch`]; network work runs in the
//! async operations below and re-enters the tree as commands. Only the
//! coordinator opens or closes the live connection.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use shared::{
    domain::{Order, OrderNumber, User},
    protocol::{LoginRequest, RegisterRequest, UpdateUserRequest},
};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::{
    api::{AuthGrant, BurgerApi, HttpBurgerApi},
    assembly::AssemblyCommand,
    catalog::CatalogCommand,
    channel::{ChannelKey, ChannelManager, FeedTransport, WebSocketTransport},
    config::ClientSettings,
    credentials::{CredentialStore, InMemoryCredentials},
    error::{ApiError, ClientError, ClientResult},
    feed::FeedCommand,
    order::{OrderCommand, OrderPhase, OrderSummary},
    request::RequestId,
    session::{AuthFlow, SessionCommand},
    state::{AppState, Command},
};

/// Applies `command` to its owning slice and wires the one cross-slice
/// effect: an order entering `Fulfilled` empties the assembly.
pub fn route(state: &AppState, command: Command) -> AppState {
    let was_fulfilled = state.order.phase == OrderPhase::Fulfilled;
    let next = state.reduce(command);
    if !was_fulfilled && next.order.phase == OrderPhase::Fulfilled {
        debug!("coordinator: order fulfilled, clearing assembly");
        return next.reduce(Command::Assembly(AssemblyCommand::Clear));
    }
    next
}

fn apply(updates: &watch::Sender<AppState>, command: Command) {
    updates.send_modify(|state| *state = route(state, command));
}

/// Channel lifecycle requests. Everything else is a plain [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelControl {
    StartPublicFeed,
    StartUserFeed,
    Stop(ChannelKey),
}

pub struct Coordinator {
    api: Arc<dyn BurgerApi>,
    credentials: Arc<dyn CredentialStore>,
    updates: Arc<watch::Sender<AppState>>,
    /// Held across socket open/close so channel requests never overlap.
    channels: Mutex<ChannelManager>,
    /// Same queue the channel reader feeds; commands sent here land after
    /// every event already emitted by the reader.
    inbound: mpsc::UnboundedSender<Command>,
    next_request: AtomicU64,
}

impl Coordinator {
    /// Must be called inside a tokio runtime: the inbound pump that feeds
    /// channel events into the state tree is spawned here.
    pub fn new(
        api: Arc<dyn BurgerApi>,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn FeedTransport>,
        settings: &ClientSettings,
    ) -> ClientResult<Arc<Self>> {
        let endpoints = settings.endpoints()?;
        let (updates, _) = watch::channel(AppState::default());
        let updates = Arc::new(updates);

        let (sink, mut inbound) = mpsc::unbounded_channel::<Command>();
        let pump = Arc::clone(&updates);
        tokio::spawn(async move {
            while let Some(command) = inbound.recv().await {
                apply(&pump, command);
            }
            debug!("coordinator: inbound pump stopped");
        });

        let inbound = sink.clone();
        let channels = ChannelManager::new(transport, endpoints, settings.reconnect_policy(), sink)
            .with_close_timeout(settings.close_timeout());

        Ok(Arc::new(Self {
            api,
            credentials,
            updates,
            channels: Mutex::new(channels),
            inbound,
            next_request: AtomicU64::new(1),
        }))
    }

    /// Production wiring: HTTP API, in-memory credentials, websocket feed.
    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Arc<Self>> {
        Self::new(
            Arc::new(HttpBurgerApi::new(settings.api_url.clone())),
            Arc::new(InMemoryCredentials::new()),
            Arc::new(WebSocketTransport),
            settings,
        )
    }

    pub fn snapshot(&self) -> AppState {
        self.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.updates.subscribe()
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Synchronous reducer step. Channel lifecycle goes through
    /// [`Coordinator::control`] instead.
    pub fn dispatch(&self, command: Command) {
        apply(&self.updates, command);
    }

    fn next_request(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn fetch_catalog(&self) -> ClientResult<()> {
        let request = self.next_request();
        self.dispatch(Command::Catalog(CatalogCommand::FetchPending { request }));

        match self.api.fetch_ingredients().await {
            Ok(items) => {
                info!(request = request.0, count = items.len(), "catalog: fetched");
                self.dispatch(Command::Catalog(CatalogCommand::FetchFulfilled {
                    request,
                    items,
                }));
                Ok(())
            }
            Err(err) => {
                warn!(request = request.0, error = %err, "catalog: fetch failed");
                self.dispatch(Command::Catalog(CatalogCommand::FetchRejected {
                    request,
                    message: err.message(),
                }));
                Err(err.into())
            }
        }
    }

    /// One-shot REST fetch of the public feed.
    pub async fn fetch_feed(&self) -> ClientResult<()> {
        let request = self.next_request();
        self.dispatch(Command::Feed(FeedCommand::FetchPending { request }));

        match self.api.fetch_feed().await {
            Ok(frame) => {
                self.dispatch(Command::Feed(FeedCommand::FetchFulfilled { request, frame }));
                Ok(())
            }
            Err(err) => {
                warn!(request = request.0, error = %err, "feed: fetch failed");
                self.dispatch(Command::Feed(FeedCommand::FetchRejected {
                    request,
                    message: err.message(),
                }));
                Err(err.into())
            }
        }
    }

    /// Submits the current assembly. The guard and the `Submitting`
    /// transition happen in one state update, so a second call made while
    /// the first is in flight is refused without reaching the API.
    pub async fn submit_order(&self) -> ClientResult<Order> {
        let mut refused = None;
        let mut materials = Vec::new();
        self.updates.send_if_modified(|state| {
            match state.order.submission(&state.assembly) {
                Ok(ids) => {
                    materials = ids;
                    *state = route(state, Command::Order(OrderCommand::SubmitPending));
                    true
                }
                Err(err) => {
                    refused = Some(err);
                    false
                }
            }
        });
        if let Some(err) = refused {
            debug!(reason = %err, "order: submission refused");
            return Err(err.into());
        }

        let token = self.credentials.access_token().await;
        info!(components = materials.len(), "order: submitting");
        match self.api.submit_order(&materials, token.as_deref()).await {
            Ok(order) => {
                info!(number = order.number.0, "order: created");
                self.dispatch(Command::Order(OrderCommand::SubmitFulfilled(order.clone())));
                Ok(order)
            }
            Err(err) => {
                warn!(error = %err, "order: submission failed");
                self.dispatch(Command::Order(OrderCommand::SubmitRejected {
                    message: err.message(),
                }));
                Err(err.into())
            }
        }
    }

    pub async fn fetch_user_orders(&self) -> ClientResult<()> {
        let Some(token) = self.credentials.access_token().await else {
            debug!("order: history requested without credentials");
            return Err(ClientError::AuthAbsent);
        };
        let request = self.next_request();
        self.dispatch(Command::Order(OrderCommand::HistoryPending { request }));

        match self.api.fetch_user_orders(Some(&token)).await {
            Ok(orders) => {
                self.dispatch(Command::Order(OrderCommand::HistoryFulfilled { request, orders }));
                Ok(())
            }
            Err(err) => {
                warn!(request = request.0, error = %err, "order: history fetch failed");
                self.dispatch(Command::Order(OrderCommand::HistoryRejected {
                    request,
                    message: err.message(),
                }));
                Err(err.into())
            }
        }
    }

    /// Local lists first (public feed, user feed, history, the order just
    /// placed); the API is asked only when none of them has it.
    pub async fn lookup_order(&self, number: OrderNumber) -> ClientResult<Option<Order>> {
        let local = {
            let state = self.updates.borrow();
            state
                .feed
                .find(number)
                .or_else(|| state.user_feed.find(number))
                .or_else(|| state.order.find(number))
                .or_else(|| state.order.current_order.as_ref().filter(|o| o.number == number))
                .cloned()
        };
        if local.is_some() {
            return Ok(local);
        }

        debug!(number = number.0, "order: not held locally, asking the api");
        Ok(self.api.order_by_number(number).await?)
    }

    pub fn summarize(&self, order: &Order) -> Option<OrderSummary> {
        OrderSummary::build(order, &self.updates.borrow().catalog.items)
    }

    /// Resolves the startup auth check. A missing credential or a failed
    /// profile fetch both end as "unauthenticated" without an error.
    pub async fn check_auth(&self) -> Option<User> {
        self.dispatch(Command::Session(SessionCommand::Pending(AuthFlow::Check)));

        let Some(token) = self.credentials.access_token().await else {
            self.dispatch(Command::Session(SessionCommand::Unauthenticated));
            return None;
        };

        match self.api.fetch_user(&token).await {
            Ok(user) => {
                self.dispatch(Command::Session(SessionCommand::Authenticated {
                    flow: AuthFlow::Check,
                    user: user.clone(),
                }));
                Some(user)
            }
            Err(err) => {
                warn!(error = %err, "session: auth check failed");
                self.dispatch(Command::Session(SessionCommand::Unauthenticated));
                None
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<User> {
        self.dispatch(Command::Session(SessionCommand::Pending(AuthFlow::Login)));
        let result = self
            .api
            .login(LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await;
        self.finish_grant(AuthFlow::Login, result).await
    }

    pub async fn register(&self, email: &str, name: &str, password: &str) -> ClientResult<User> {
        self.dispatch(Command::Session(SessionCommand::Pending(AuthFlow::Register)));
        let result = self
            .api
            .register(RegisterRequest {
                email: email.to_string(),
                name: name.to_string(),
                password: password.to_string(),
            })
            .await;
        self.finish_grant(AuthFlow::Register, result).await
    }

    async fn finish_grant(
        &self,
        flow: AuthFlow,
        result: Result<AuthGrant, ApiError>,
    ) -> ClientResult<User> {
        match result {
            Ok(grant) => {
                self.credentials
                    .store(&grant.access_token, &grant.refresh_token)
                    .await;
                info!(flow = ?flow, "session: signed in");
                self.dispatch(Command::Session(SessionCommand::Authenticated {
                    flow,
                    user: grant.user.clone(),
                }));
                Ok(grant.user)
            }
            Err(err) => {
                warn!(flow = ?flow, error = %err, "session: sign-in failed");
                self.dispatch(Command::Session(SessionCommand::Rejected {
                    flow,
                    message: err.message(),
                }));
                Err(err.into())
            }
        }
    }

    pub async fn update_profile(&self, request: UpdateUserRequest) -> ClientResult<User> {
        let Some(token) = self.credentials.access_token().await else {
            return Err(ClientError::AuthAbsent);
        };
        self.dispatch(Command::Session(SessionCommand::Pending(AuthFlow::Update)));

        match self.api.update_user(&token, request).await {
            Ok(user) => {
                self.dispatch(Command::Session(SessionCommand::Authenticated {
                    flow: AuthFlow::Update,
                    user: user.clone(),
                }));
                Ok(user)
            }
            Err(err) => {
                warn!(error = %err, "session: profile update failed");
                self.dispatch(Command::Session(SessionCommand::Rejected {
                    flow: AuthFlow::Update,
                    message: err.message(),
                }));
                Err(err.into())
            }
        }
    }

    /// Revokes the refresh credential, forgets both credentials, closes the
    /// user feed if it is the open channel and drops every private order
    /// held in the tree.
    pub async fn logout(&self) -> ClientResult<()> {
        self.dispatch(Command::Session(SessionCommand::Pending(AuthFlow::Logout)));

        if let Some(refresh_token) = self.credentials.refresh_token().await {
            if let Err(err) = self.api.logout(&refresh_token).await {
                warn!(error = %err, "session: logout failed");
                self.dispatch(Command::Session(SessionCommand::Rejected {
                    flow: AuthFlow::Logout,
                    message: err.message(),
                }));
                return Err(err.into());
            }
        }

        self.credentials.clear().await;
        self.channels.lock().await.stop(ChannelKey::UserFeed).await;
        self.reset_user_feed().await;
        self.dispatch(Command::Order(OrderCommand::ClearUserOrders));
        self.dispatch(Command::Session(SessionCommand::LoggedOut));
        info!("session: signed out");
        Ok(())
    }

    /// Queues the reset behind frames the stopped reader already emitted and
    /// waits for the pump to apply it.
    async fn reset_user_feed(&self) {
        let mut updates = self.updates.subscribe();
        let target = updates.borrow().user_feed.resets() + 1;
        if self.inbound.send(Command::UserFeed(FeedCommand::Reset)).is_err() {
            debug!("coordinator: inbound pump gone, resetting user feed directly");
            self.dispatch(Command::UserFeed(FeedCommand::Reset));
            return;
        }
        if updates
            .wait_for(|state| state.user_feed.resets() >= target)
            .await
            .is_err()
        {
            debug!("coordinator: state closed before user feed reset");
        }
    }

    /// The only path to the live connection.
    pub async fn control(&self, control: ChannelControl) -> ClientResult<()> {
        match control {
            ChannelControl::StartPublicFeed => {
                let mut channels = self.channels.lock().await;
                channels.start(ChannelKey::PublicFeed, None).await?;
            }
            ChannelControl::StartUserFeed => {
                let Some(token) = self.credentials.access_token().await else {
                    warn!("channel: user feed requested without credentials");
                    return Err(ClientError::AuthAbsent);
                };
                let mut channels = self.channels.lock().await;
                channels.start(ChannelKey::UserFeed, Some(&token)).await?;
            }
            ChannelControl::Stop(key) => {
                self.channels.lock().await.stop(key).await;
            }
        }
        Ok(())
    }

    pub async fn start_public_feed(&self) -> ClientResult<()> {
        self.control(ChannelControl::StartPublicFeed).await
    }

    pub async fn start_user_feed(&self) -> ClientResult<()> {
        self.control(ChannelControl::StartUserFeed).await
    }

    pub async fn stop_channel(&self, key: ChannelKey) -> ClientResult<()> {
        self.control(ChannelControl::Stop(key)).await
    }

    pub async fn active_channel(&self) -> Option<ChannelKey> {
        self.channels.lock().await.active()
    }

    /// Closes any open connection.
    pub async fn shutdown(&self) {
        self.channels.lock().await.close_active().await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use shared::domain::{Category, Component, ComponentId, Nutrition, OrderId, OrderStatus};

    use super::*;

    fn bun() -> Component {
        Component {
            id: ComponentId::new("bun-1"),
            category: Category::Base,
            name: "Bun".into(),
            nutrition: Nutrition::default(),
            price: 10,
            image: String::new(),
            image_mobile: String::new(),
            image_large: String::new(),
        }
    }

    fn order() -> Order {
        Order {
            id: OrderId::new("o-1"),
            ingredients: vec![ComponentId::new("bun-1")],
            status: OrderStatus::Done,
            name: "Space burger".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            number: OrderNumber(7),
        }
    }

    #[test]
    fn fulfilled_transition_clears_assembly() {
        let state = route(
            &AppState::default(),
            Command::Assembly(AssemblyCommand::SetBase(bun())),
        );
        let state = route(&state, Command::Order(OrderCommand::SubmitPending));
        assert!(state.assembly.base.is_some());

        let state = route(&state, Command::Order(OrderCommand::SubmitFulfilled(order())));
        assert_eq!(state.order.phase, OrderPhase::Fulfilled);
        assert!(state.assembly.base.is_none());
        assert!(state.assembly.items.is_empty());
    }

    #[test]
    fn failed_submission_keeps_assembly() {
        let state = route(
            &AppState::default(),
            Command::Assembly(AssemblyCommand::SetBase(bun())),
        );
        let state = route(&state, Command::Order(OrderCommand::SubmitPending));
        let state = route(
            &state,
            Command::Order(OrderCommand::SubmitRejected { message: None }),
        );
        assert_eq!(state.order.phase, OrderPhase::Failed);
        assert!(state.assembly.base.is_some());
    }

    #[test]
    fn assembly_built_after_fulfilment_survives_other_commands() {
        let state = route(&AppState::default(), Command::Order(OrderCommand::SubmitPending));
        let state = route(&state, Command::Order(OrderCommand::SubmitFulfilled(order())));
        let state = route(&state, Command::Assembly(AssemblyCommand::SetBase(bun())));
        let state = route(&state, Command::Catalog(CatalogCommand::ClearCurrent));
        assert!(state.assembly.base.is_some());
    }
}
