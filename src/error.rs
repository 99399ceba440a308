use thiserror::Error;

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Store-side failures. Remote call failures never surface here: the sync
/// engine folds them into report counters.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A store operation ran before `Db::initialize` completed.
    #[error("catalog store is not initialized")]
    Uninitialized,

    /// The store could not be brought up at all. Aborts the calling run.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// A value could not be encoded for a JSON text column.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("migration {name} failed: {reason}")]
    Migration { name: String, reason: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
