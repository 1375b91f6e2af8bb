//! Login state of an external CLI.

use serde::Serialize;

/// Login state reported by a tool's status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum AuthState {
    /// Logged in, with the account name when it could be parsed
    LoggedIn(Option<String>),
    /// Not logged in
    LoggedOut,
    /// The CLI is not installed or failed for another reason
    Unavailable(String),
}

impl AuthState {
    /// Whether mutations can be attempted.
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Self::LoggedIn(_))
    }

    /// Short description for status output.
    pub fn describe(&self) -> String {
        match self {
            Self::LoggedIn(Some(account)) => format!("logged in as {account}"),
            Self::LoggedIn(None) => "logged in".to_string(),
            Self::LoggedOut => "not logged in".to_string(),
            Self::Unavailable(reason) => format!("unavailable ({reason})"),
        }
    }
}
