use {kolbridge_common::FromMessage, thiserror::Error};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {0} referenced in config but not set")]
    MissingEnvVar(String),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

kolbridge_common::impl_context!();
