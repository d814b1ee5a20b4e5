use thiserror::Error;

/// Error kinds surfaced by the engine.
///
/// Nothing in the hot render path raises across a job boundary; worker
/// failures travel inside result messages and are converted to
/// [`EngineError::TileRender`] at the coordinator.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Caller provided out-of-range settings (scale <= 0, tile size not a
    /// power of two, malformed coordinate string, ...). Surfaced
    /// synchronously from constructors and validators.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Requested scale is below the arbitrary tier's limb ceiling. The
    /// engine still renders at the deepest supported precision; this is
    /// reported as a stats warning.
    #[error("scale {scale:e} is below the deepest supported precision")]
    PrecisionExhausted { scale: f64 },

    /// A worker returned an error for a tile.
    #[error("tile render failed: {0}")]
    TileRender(String),

    /// Persistent store (L3) failure. The engine continues with L1+L2.
    #[error("cache backend fault: {0}")]
    CacheBackend(String),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }
}
