use thiserror::Error;

/// Errors raised by an emitter store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Unsupported store schema version {found} (newest known is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Emitter {0} already stored")]
    DuplicateKey(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Store is closed")]
    Closed,
}

/// Locator error types
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("Invalid emitter identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid coordinates: lat={lat}, lon={lon}, accuracy={accuracy}")]
    InvalidCoordinates { lat: f64, lon: f64, accuracy: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config I/O failed: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Engine is closed")]
    Closed,
}

/// Result type for locator operations
pub type Result<T> = std::result::Result<T, LocatorError>;
