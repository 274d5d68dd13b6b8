use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuzzError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Question set error: {0}")]
    Questions(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
