use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Idol not found: {0}")]
    IdolNotFound(String),

    #[error("No idols registered")]
    EmptyRegistry,
}

pub type Result<T> = std::result::Result<T, BotError>;
