use thiserror::Error;

pub type MkvResult<T> = Result<T, MkvError>;

#[derive(Debug, Error)]
pub enum MkvError {
    #[error("config error: {0}")]
    Config(String),

    #[error("version error: {0}")]
    Version(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
