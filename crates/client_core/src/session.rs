//! Signed-in user and the outcome of the auth flows.

use serde::{Deserialize, Serialize};
use shared::domain::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    Login,
    Register,
    Update,
    Check,
    Logout,
}

impl AuthFlow {
    fn fallback(self) -> &'static str {
        match self {
            AuthFlow::Login => "Login failed",
            AuthFlow::Register => "Registration failed",
            AuthFlow::Update => "Update failed",
            AuthFlow::Check => "Authentication check failed",
            AuthFlow::Logout => "Logout failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_auth: bool,
    /// Set once the startup auth check has resolved either way.
    pub auth_checked: bool,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionCommand {
    Pending(AuthFlow),
    Authenticated { flow: AuthFlow, user: User },
    Rejected { flow: AuthFlow, message: Option<String> },
    /// Auth check resolved negatively; not an error.
    Unauthenticated,
    LoggedOut,
    ClearError,
    #[serde(other)]
    Unrecognized,
}

pub fn reduce(state: &SessionState, command: SessionCommand) -> SessionState {
    match command {
        // A background auth check must not wipe an error the user is looking at.
        SessionCommand::Pending(AuthFlow::Check) => SessionState {
            loading: true,
            ..state.clone()
        },
        SessionCommand::Pending(_) => SessionState {
            loading: true,
            error: None,
            ..state.clone()
        },
        SessionCommand::Authenticated { flow, user } => SessionState {
            user: Some(user),
            is_auth: true,
            auth_checked: state.auth_checked || flow == AuthFlow::Check,
            loading: false,
            ..state.clone()
        },
        SessionCommand::Rejected { flow, message } => SessionState {
            loading: false,
            error: Some(message.unwrap_or_else(|| flow.fallback().to_string())),
            ..state.clone()
        },
        SessionCommand::Unauthenticated => SessionState {
            user: None,
            is_auth: false,
            auth_checked: true,
            loading: false,
            ..state.clone()
        },
        SessionCommand::LoggedOut => SessionState {
            auth_checked: state.auth_checked,
            ..SessionState::default()
        },
        SessionCommand::ClearError => SessionState {
            error: None,
            ..state.clone()
        },
        SessionCommand::Unrecognized => state.clone(),
    }
}
