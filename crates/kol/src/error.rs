use {kolbridge_common::FromMessage, thiserror::Error};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The server is in its nightly maintenance window; requests are
    /// suppressed until a login probe succeeds again.
    #[error("server is down for maintenance")]
    Maintenance,

    #[error("not logged in")]
    NotLoggedIn,
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

kolbridge_common::impl_context!();
