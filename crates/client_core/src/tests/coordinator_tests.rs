use super::*;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{
        Category, Component, ComponentId, Nutrition, Order, OrderId, OrderNumber, OrderStatus,
        User,
    },
    protocol::{FeedFrame, LoginRequest, RegisterRequest, UpdateUserRequest},
};
use tokio::sync::{mpsc, Notify};
use url::Url;

fn component(id: &str, category: Category, price: u32) -> Component {
    Component {
        id: ComponentId::new(id),
        category,
        name: id.to_string(),
        nutrition: Nutrition::default(),
        price,
        image: String::new(),
        image_mobile: String::new(),
        image_large: String::new(),
    }
}

fn order(number: u64, ingredients: &[&str]) -> Order {
    Order {
        id: OrderId::new(format!("order-{number}")),
        ingredients: ingredients.iter().map(|id| ComponentId::new(*id)).collect(),
        status: OrderStatus::Done,
        name: "Space burger".into(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        number: OrderNumber(number),
    }
}

fn cook() -> User {
    User {
        email: "cook@example.com".into(),
        name: "Cook".into(),
    }
}

fn rejected(message: Option<&str>) -> ApiError {
    ApiError::Rejected {
        status: 500,
        message: message.map(str::to_string),
    }
}

struct MockApi {
    catalog: Mutex<Result<Vec<Component>, Option<String>>>,
    submit_gate: Option<Arc<Notify>>,
    submit_fails: bool,
    submitted: Mutex<Vec<(Vec<ComponentId>, Option<String>)>>,
    user_orders: Vec<Order>,
    remote_order: Option<Order>,
    submit_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    user_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl MockApi {
    fn new() -> Self {
        Self {
            catalog: Mutex::new(Ok(vec![
                component("bun-1", Category::Base, 20),
                component("sauce-1", Category::Sauce, 5),
            ])),
            submit_gate: None,
            submit_fails: false,
            submitted: Mutex::new(Vec::new()),
            user_orders: vec![order(11, &["bun-1"])],
            remote_order: Some(order(99, &["bun-1"])),
            submit_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
            user_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BurgerApi for MockApi {
    async fn fetch_ingredients(&self) -> Result<Vec<Component>, ApiError> {
        match &*self.catalog.lock().expect("catalog") {
            Ok(items) => Ok(items.clone()),
            Err(message) => Err(rejected(message.as_deref())),
        }
    }

    async fn fetch_feed(&self) -> Result<FeedFrame, ApiError> {
        Ok(FeedFrame {
            orders: vec![order(1, &["bun-1"])],
            total: Some(100),
            total_today: Some(3),
        })
    }

    async fn submit_order(
        &self,
        ingredients: &[ComponentId],
        access_token: Option<&str>,
    ) -> Result<Order, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted
            .lock()
            .expect("submitted")
            .push((ingredients.to_vec(), access_token.map(str::to_string)));
        if let Some(gate) = &self.submit_gate {
            gate.notified().await;
        }
        if self.submit_fails {
            return Err(rejected(None));
        }
        Ok(order(
            7,
            &ingredients.iter().map(ComponentId::as_str).collect::<Vec<_>>(),
        ))
    }

    async fn fetch_user_orders(&self, access_token: Option<&str>) -> Result<Vec<Order>, ApiError> {
        assert_eq!(access_token, Some("tok"));
        Ok(self.user_orders.clone())
    }

    async fn order_by_number(&self, number: OrderNumber) -> Result<Option<Order>, ApiError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.remote_order.clone().filter(|o| o.number == number))
    }

    async fn login(&self, request: LoginRequest) -> Result<AuthGrant, ApiError> {
        if request.password != "secret" {
            return Err(rejected(Some("email or password are incorrect")));
        }
        Ok(AuthGrant {
            user: cook(),
            access_token: "Bearer tok".into(),
            refresh_token: "refresh".into(),
        })
    }

    async fn register(&self, _request: RegisterRequest) -> Result<AuthGrant, ApiError> {
        Err(rejected(None))
    }

    async fn fetch_user(&self, _access_token: &str) -> Result<User, ApiError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        Ok(cook())
    }

    async fn update_user(
        &self,
        _access_token: &str,
        request: UpdateUserRequest,
    ) -> Result<User, ApiError> {
        Ok(User {
            name: request.name.unwrap_or_else(|| cook().name),
            ..cook()
        })
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        assert_eq!(refresh_token, "refresh");
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Live transport whose sockets are fed by the test.
#[derive(Clone, Default)]
struct PipeTransport {
    opened: Arc<Mutex<Vec<String>>>,
    peers: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
}

impl PipeTransport {
    fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("opened").clone()
    }

    fn push_latest(&self, frame: &str) {
        let peers = self.peers.lock().expect("peers");
        peers
            .last()
            .expect("a connection")
            .send(frame.to_string())
            .expect("socket alive");
    }
}

#[async_trait]
impl FeedTransport for PipeTransport {
    async fn open(&self, endpoint: &Url) -> anyhow::Result<Box<dyn FeedSocket>> {
        self.opened.lock().expect("opened").push(endpoint.to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().expect("peers").push(tx);
        Ok(Box::new(PipeSocket { frames: rx }))
    }
}

struct PipeSocket {
    frames: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FeedSocket for PipeSocket {
    async fn next_frame(&mut self) -> Option<anyhow::Result<String>> {
        self.frames.recv().await.map(Ok)
    }

    async fn close(&mut self) {}
}

fn coordinator_with(
    api: Arc<MockApi>,
    credentials: Arc<InMemoryCredentials>,
    transport: PipeTransport,
) -> Arc<Coordinator> {
    let settings = ClientSettings {
        api_url: "http://burger.test/api".into(),
        ..ClientSettings::default()
    };
    Coordinator::new(api, credentials, Arc::new(transport), &settings).expect("coordinator")
}

fn coordinator(api: Arc<MockApi>) -> Arc<Coordinator> {
    coordinator_with(
        api,
        Arc::new(InMemoryCredentials::new()),
        PipeTransport::default(),
    )
}

async fn wait_until(
    coordinator: &Coordinator,
    predicate: impl FnMut(&AppState) -> bool,
) -> AppState {
    let mut rx = coordinator.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("state in time")
        .expect("coordinator alive")
        .clone();
    state
}

fn build_burger(coordinator: &Coordinator) {
    coordinator.dispatch(Command::Assembly(AssemblyCommand::SetBase(component(
        "bun-1",
        Category::Base,
        20,
    ))));
    coordinator.dispatch(Command::Assembly(AssemblyCommand::add_item(component(
        "sauce-1",
        Category::Sauce,
        5,
    ))));
}

#[tokio::test]
async fn submit_without_base_never_reaches_the_api() {
    let api = Arc::new(MockApi::new());
    let coordinator = coordinator(api.clone());

    let err = coordinator.submit_order().await.expect_err("refused");
    assert!(matches!(
        err,
        ClientError::Validation(ValidationError::MissingBase)
    ));
    assert_eq!(api.submit_calls.load(Ordering::SeqCst), 0);

    let state = coordinator.snapshot();
    assert_eq!(state.order.phase, OrderPhase::Idle);
    assert!(state.order.error.is_none());
}

#[tokio::test]
async fn second_submit_while_in_flight_is_refused() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(MockApi {
        submit_gate: Some(gate.clone()),
        ..MockApi::new()
    });
    let coordinator = coordinator(api.clone());
    build_burger(&coordinator);

    let first = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.submit_order().await }
    });
    wait_until(&coordinator, |state| state.order.loading()).await;

    let err = coordinator.submit_order().await.expect_err("in flight");
    assert!(matches!(
        err,
        ClientError::Validation(ValidationError::SubmissionInFlight)
    ));

    gate.notify_one();
    let placed = first.await.expect("join").expect("order placed");
    assert_eq!(placed.number, OrderNumber(7));
    assert_eq!(api.submit_calls.load(Ordering::SeqCst), 1);

    let submitted = api.submitted.lock().expect("submitted").clone();
    assert_eq!(
        submitted[0].0,
        vec![
            ComponentId::new("bun-1"),
            ComponentId::new("sauce-1"),
            ComponentId::new("bun-1"),
        ]
    );
}

#[tokio::test]
async fn fulfilled_order_resets_the_assembly() {
    let api = Arc::new(MockApi::new());
    let coordinator = coordinator(api);
    build_burger(&coordinator);
    assert_eq!(coordinator.snapshot().assembly.price(), 45);

    coordinator.submit_order().await.expect("order placed");

    let state = coordinator.snapshot();
    assert_eq!(state.order.phase, OrderPhase::Fulfilled);
    assert_eq!(
        state.order.current_order.as_ref().map(|o| o.number),
        Some(OrderNumber(7))
    );
    assert!(state.assembly.base.is_none());
    assert!(state.assembly.items.is_empty());

    coordinator.dispatch(Command::Order(OrderCommand::Clear));
    let state = coordinator.snapshot();
    assert_eq!(state.order.phase, OrderPhase::Idle);
    assert!(state.order.current_order.is_none());
}

#[tokio::test]
async fn failed_submission_keeps_the_assembly_and_reports_fallback() {
    let api = Arc::new(MockApi {
        submit_fails: true,
        ..MockApi::new()
    });
    let coordinator = coordinator(api);
    build_burger(&coordinator);

    coordinator.submit_order().await.expect_err("rejected");

    let state = coordinator.snapshot();
    assert_eq!(state.order.phase, OrderPhase::Failed);
    assert_eq!(state.order.error.as_deref(), Some("Failed to create order"));
    assert!(state.assembly.base.is_some());
    assert_eq!(state.assembly.items.len(), 1);
}

#[tokio::test]
async fn catalog_refetch_failure_keeps_previous_items() {
    let api = Arc::new(MockApi::new());
    let coordinator = coordinator(api.clone());

    coordinator.fetch_catalog().await.expect("catalog");
    assert_eq!(coordinator.snapshot().catalog.items.len(), 2);

    *api.catalog.lock().expect("catalog") = Err(None);
    coordinator.fetch_catalog().await.expect_err("rejected");

    let state = coordinator.snapshot();
    assert_eq!(state.catalog.items.len(), 2);
    assert!(!state.catalog.loading);
    assert_eq!(state.catalog.error.as_deref(), Some("Failed to fetch ingredients"));
}

#[tokio::test]
async fn one_shot_feed_fetch_fills_the_public_feed() {
    let coordinator = coordinator(Arc::new(MockApi::new()));
    coordinator.fetch_feed().await.expect("feed");

    let state = coordinator.snapshot();
    assert_eq!(state.feed.total, 100);
    assert_eq!(state.feed.total_today, 3);
    assert_eq!(state.feed.orders.len(), 1);
    assert!(!state.feed.loading);
}

#[tokio::test]
async fn live_frame_replaces_feed_data_without_loading() {
    let transport = PipeTransport::default();
    let coordinator = coordinator_with(
        Arc::new(MockApi::new()),
        Arc::new(InMemoryCredentials::new()),
        transport.clone(),
    );

    coordinator.start_public_feed().await.expect("public feed");
    assert_eq!(transport.opened(), vec!["ws://burger.test/orders/all".to_string()]);
    wait_until(&coordinator, |state| state.feed.connected).await;

    transport.push_latest(r#"{"orders":[],"total":42,"totalToday":7}"#);
    let state = wait_until(&coordinator, |state| state.feed.total == 42).await;
    assert_eq!(state.feed.total_today, 7);
    assert!(!state.feed.loading);
    assert_eq!(state.user_feed, FeedState::default());

    coordinator.stop_channel(ChannelKey::PublicFeed).await.expect("stop");
    let state = wait_until(&coordinator, |state| !state.feed.connected).await;
    assert_eq!(state.feed.total, 42);
    assert_eq!(coordinator.active_channel().await, None);
}

#[tokio::test]
async fn check_auth_without_credentials_resolves_unauthenticated() {
    let api = Arc::new(MockApi::new());
    let coordinator = coordinator(api.clone());

    assert_eq!(coordinator.check_auth().await, None);

    let state = coordinator.snapshot();
    assert!(state.session.auth_checked);
    assert!(!state.session.is_auth);
    assert!(state.session.error.is_none());
    assert_eq!(api.user_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn user_feed_requires_credentials_and_keeps_public_feed_open() {
    let transport = PipeTransport::default();
    let coordinator = coordinator_with(
        Arc::new(MockApi::new()),
        Arc::new(InMemoryCredentials::new()),
        transport.clone(),
    );
    coordinator.start_public_feed().await.expect("public feed");

    let err = coordinator.start_user_feed().await.expect_err("no token");
    assert!(matches!(err, ClientError::AuthAbsent));
    assert_eq!(coordinator.active_channel().await, Some(ChannelKey::PublicFeed));
    assert_eq!(transport.opened().len(), 1);
}

#[tokio::test]
async fn login_then_user_feed_then_logout() {
    let api = Arc::new(MockApi::new());
    let credentials = Arc::new(InMemoryCredentials::new());
    let transport = PipeTransport::default();
    let coordinator = coordinator_with(api.clone(), credentials.clone(), transport.clone());

    let err = coordinator
        .login("cook@example.com", "wrong")
        .await
        .expect_err("bad password");
    assert!(matches!(err, ClientError::Api(_)));
    assert_eq!(
        coordinator.snapshot().session.error.as_deref(),
        Some("email or password are incorrect")
    );

    let user = coordinator
        .login("cook@example.com", "secret")
        .await
        .expect("login");
    assert_eq!(user, cook());
    assert_eq!(credentials.access_token().await.as_deref(), Some("tok"));
    let state = coordinator.snapshot();
    assert!(state.session.is_auth);
    assert!(state.session.error.is_none());

    coordinator.start_user_feed().await.expect("user feed");
    assert_eq!(
        transport.opened(),
        vec!["ws://burger.test/orders?token=tok".to_string()]
    );
    coordinator.fetch_user_orders().await.expect("history");
    assert_eq!(coordinator.snapshot().order.user_orders.len(), 1);

    coordinator.logout().await.expect("logout");
    assert_eq!(api.logout_calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.active_channel().await, None);
    assert_eq!(credentials.access_token().await, None);
    let state = coordinator.snapshot();
    assert!(!state.session.is_auth);
    assert!(state.session.user.is_none());
    assert!(state.order.user_orders.is_empty());
}

#[tokio::test]
async fn logout_forgets_live_private_orders() {
    let api = Arc::new(MockApi::new());
    let credentials = Arc::new(InMemoryCredentials::new());
    let transport = PipeTransport::default();
    let coordinator = coordinator_with(api.clone(), credentials, transport.clone());

    coordinator
        .login("cook@example.com", "secret")
        .await
        .expect("login");
    coordinator.start_user_feed().await.expect("user feed");
    wait_until(&coordinator, |state| state.user_feed.connected).await;

    let frame = FeedFrame {
        orders: vec![order(555, &["bun-1"])],
        total: None,
        total_today: None,
    };
    transport.push_latest(&serde_json::to_string(&frame).expect("frame json"));
    wait_until(&coordinator, |state| {
        state.user_feed.find(OrderNumber(555)).is_some()
    })
    .await;

    coordinator.logout().await.expect("logout");
    let state = coordinator.snapshot();
    assert!(state.user_feed.orders.is_empty());
    assert!(!state.user_feed.connected);

    let found = coordinator
        .lookup_order(OrderNumber(555))
        .await
        .expect("lookup");
    assert_eq!(found, None);
    assert_eq!(api.lookup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn history_and_profile_need_credentials() {
    let coordinator = coordinator(Arc::new(MockApi::new()));

    assert!(matches!(
        coordinator.fetch_user_orders().await,
        Err(ClientError::AuthAbsent)
    ));
    assert!(matches!(
        coordinator
            .update_profile(UpdateUserRequest {
                email: None,
                name: Some("Chef".into()),
                password: None,
            })
            .await,
        Err(ClientError::AuthAbsent)
    ));
    assert!(!coordinator.snapshot().order.history_loading);
}

#[tokio::test]
async fn profile_update_replaces_the_user() {
    let credentials = Arc::new(InMemoryCredentials::with_tokens("tok", "refresh"));
    let coordinator = coordinator_with(
        Arc::new(MockApi::new()),
        credentials,
        PipeTransport::default(),
    );

    assert_eq!(coordinator.check_auth().await, Some(cook()));
    let user = coordinator
        .update_profile(UpdateUserRequest {
            email: None,
            name: Some("Chef".into()),
            password: None,
        })
        .await
        .expect("update");
    assert_eq!(user.name, "Chef");
    assert_eq!(
        coordinator.snapshot().session.user.map(|u| u.name),
        Some("Chef".to_string())
    );
}

#[tokio::test]
async fn registration_failure_uses_fallback_message() {
    let coordinator = coordinator(Arc::new(MockApi::new()));
    coordinator
        .register("cook@example.com", "Cook", "secret")
        .await
        .expect_err("rejected");
    assert_eq!(
        coordinator.snapshot().session.error.as_deref(),
        Some("Registration failed")
    );
}

#[tokio::test]
async fn lookup_prefers_local_orders() {
    let api = Arc::new(MockApi::new());
    let coordinator = coordinator(api.clone());
    coordinator.fetch_catalog().await.expect("catalog");
    coordinator.dispatch(Command::Feed(FeedCommand::ReplaceData(FeedFrame {
        orders: vec![order(5, &["bun-1", "sauce-1", "sauce-1", "bun-1"])],
        total: Some(1),
        total_today: Some(1),
    })));

    let local = coordinator
        .lookup_order(OrderNumber(5))
        .await
        .expect("lookup")
        .expect("found locally");
    assert_eq!(api.lookup_calls.load(Ordering::SeqCst), 0);

    let summary = coordinator.summarize(&local).expect("summary");
    assert_eq!(summary.total, 50);

    let remote = coordinator
        .lookup_order(OrderNumber(99))
        .await
        .expect("lookup");
    assert_eq!(remote.map(|o| o.number), Some(OrderNumber(99)));
    assert_eq!(api.lookup_calls.load(Ordering::SeqCst), 1);

    assert_eq!(
        coordinator
            .lookup_order(OrderNumber(404))
            .await
            .expect("lookup"),
        None
    );
}

#[tokio::test]
async fn json_commands_drive_the_tree() {
    let coordinator = coordinator(Arc::new(MockApi::new()));
    let command: Command = serde_json::from_str(r#"{"type":"feature_from_the_future"}"#)
        .expect("command");
    let before = coordinator.snapshot();
    coordinator.dispatch(command);
    assert_eq!(coordinator.snapshot(), before);
}
