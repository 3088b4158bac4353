use thiserror::Error;

#[derive(Error, Debug)]
pub enum HojokinError {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
