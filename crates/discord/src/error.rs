use {kolbridge_common::FromMessage, std::time::Duration, thiserror::Error};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Gateway(#[from] serenity::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// 429 from the webhook endpoint, carrying the advertised delay.
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

kolbridge_common::impl_context!();
