//! The composed state tree and the command envelope routed through it.

use serde::{Deserialize, Serialize};

use crate::{
    assembly::{self, AssemblyCommand, AssemblyState},
    catalog::{self, CatalogCommand, CatalogState},
    feed::{self, FeedCommand, FeedState},
    order::{self, OrderCommand, OrderState},
    session::{self, SessionCommand, SessionState},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub catalog: CatalogState,
    pub assembly: AssemblyState,
    pub order: OrderState,
    pub feed: FeedState,
    pub user_feed: FeedState,
    pub session: SessionState,
}

/// Every command names exactly one owning slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Command {
    Catalog(CatalogCommand),
    Assembly(AssemblyCommand),
    Order(OrderCommand),
    Feed(FeedCommand),
    UserFeed(FeedCommand),
    Session(SessionCommand),
    /// Anything a newer front-end sends that this engine does not know.
    #[serde(other)]
    Unrecognized,
}

impl AppState {
    /// Applies `command` to its owning slice; every other slice is carried
    /// over untouched.
    pub fn reduce(&self, command: Command) -> AppState {
        match command {
            Command::Catalog(command) => AppState {
                catalog: catalog::reduce(&self.catalog, command),
                ..self.clone()
            },
            Command::Assembly(command) => AppState {
                assembly: assembly::reduce(&self.assembly, command),
                ..self.clone()
            },
            Command::Order(command) => AppState {
                order: order::reduce(&self.order, command),
                ..self.clone()
            },
            Command::Feed(command) => AppState {
                feed: feed::reduce(&self.feed, command),
                ..self.clone()
            },
            Command::UserFeed(command) => AppState {
                user_feed: feed::reduce(&self.user_feed, command),
                ..self.clone()
            },
            Command::Session(command) => AppState {
                session: session::reduce(&self.session, command),
                ..self.clone()
            },
            Command::Unrecognized => self.clone(),
        }
    }
}
