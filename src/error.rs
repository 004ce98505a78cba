use thiserror::Error;

pub type Result<T> = std::result::Result<T, RestoreError>;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tape hardware error: {0}")]
    Hardware(String),

    #[error("TLV codec error: {0}")]
    Codec(String),

    #[error("Index store error: {0}")]
    Index(String),

    #[error("Database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Object store error: {0}")]
    Emitter(String),

    #[error("Staging cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identifier parse error: {0}")]
    Id(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl RestoreError {
    pub fn hardware<T: Into<String>>(msg: T) -> Self {
        Self::Hardware(msg.into())
    }

    pub fn codec<T: Into<String>>(msg: T) -> Self {
        Self::Codec(msg.into())
    }

    pub fn index<T: Into<String>>(msg: T) -> Self {
        Self::Index(msg.into())
    }

    pub fn emitter<T: Into<String>>(msg: T) -> Self {
        Self::Emitter(msg.into())
    }

    pub fn cache<T: Into<String>>(msg: T) -> Self {
        Self::Cache(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn id<T: Into<String>>(msg: T) -> Self {
        Self::Id(msg.into())
    }

    pub fn simulation<T: Into<String>>(msg: T) -> Self {
        Self::Simulation(msg.into())
    }
}
