//! Client-side state and synchronization engine for the burger ordering
//! client: assembly, order submission, catalog, live order feeds and the
//! single live connection that serves them.

pub mod api;
pub mod assembly;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod feed;
pub mod order;
pub mod request;
pub mod session;
pub mod state;

pub use api::{AuthGrant, BurgerApi, HttpBurgerApi};
pub use assembly::{AssemblyCommand, AssemblyItem, AssemblyState, InstanceId};
pub use catalog::{CatalogCommand, CatalogState};
pub use channel::{
    ChannelEndpoints, ChannelKey, ChannelManager, FeedSocket, FeedTransport, ReconnectPolicy,
    WebSocketTransport,
};
pub use config::{load_settings, ClientSettings};
pub use coordinator::{route, ChannelControl, Coordinator};
pub use credentials::{CredentialStore, InMemoryCredentials};
pub use error::{ApiError, ChannelError, ClientError, ClientResult, ProtocolError, ValidationError};
pub use feed::{FeedCommand, FeedState};
pub use order::{OrderCommand, OrderPhase, OrderState, OrderSummary, SummaryLine};
pub use request::RequestId;
pub use session::{AuthFlow, SessionCommand, SessionState};
pub use state::{AppState, Command};

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod channel_tests;

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod coordinator_tests;
