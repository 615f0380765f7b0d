//! Typed errors for the gateway library
//!
//! Only genuinely fatal conditions surface here; per-device send failures are
//! reported as booleans so batch operations can continue past them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Sync cannot start without a pixel source to sample
    #[error("no pixel source supplied; sync cannot start")]
    NoPixelSource,

    /// Sample rate must be a positive frequency
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    /// A command or query referenced a device the registry has never seen
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// A scene was requested that the configuration does not define
    #[error("unknown scene: {0}")]
    UnknownScene(String),

    /// A scene must carry at least one keyframe to be playable
    #[error("scene '{0}' has no keyframes")]
    EmptyScene(String),
}

pub type Result<T> = std::result::Result<T, Error>;
