use thiserror::Error;

/// Main error type for the recovery engine
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory mapping error: {0}")]
    Mmap(String),

    #[error("Storage image not found: {0}")]
    FileNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scan failed after {blocks_processed} blocks: {source}")]
    ScanFailed {
        blocks_processed: u64,
        #[source]
        source: Box<RecoveryError>,
    },

    #[error("Checkpoint cannot be resumed: {0}")]
    ResumeRejected(String),
}

/// Result type alias for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;
