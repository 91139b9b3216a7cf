//! Error taxonomy for the live update pipeline.
//!
//! Every error here is recovered locally by the component that observes it.
//! None of them halt the update loop; at worst a single region falls back to
//! the placeholder image for its current attempt.

use thiserror::Error;

/// The transport could not establish a duplex channel.
///
/// Recovered by the next `send`, which starts a fresh connect attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connection refused by {endpoint}: {reason}")]
    Refused { endpoint: String, reason: String },
    #[error("connection attempt aborted: {0}")]
    Aborted(String),
    #[error("connection manager is closed")]
    ManagerClosed,
}

/// A vector snapshot could not be converted to a bitmap.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RasterizeError {
    #[error("snapshot has no drawable area ({width}x{height} px)")]
    EmptyArea { width: u32, height: u32 },
    #[error("unsupported content: {0}")]
    Unsupported(String),
    #[error("rasterizer unavailable: {0}")]
    Environment(String),
}

/// Inbound or outbound payloads that do not match the wire contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// A request could not be handed to the transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connection lost before transmission after {attempts} attempt(s)")]
    ConnectionLost { attempts: u32 },
}

/// Configuration values that cannot drive a loop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("tick_interval_ms must be greater than zero")]
    ZeroTickInterval,
    #[error("raster.target_size must be greater than zero")]
    ZeroTargetSize,
    #[error("generation.strength must be within 0.0..=1.0 (got {0})")]
    StrengthOutOfRange(f64),
    #[error("generation.num_inference_steps must be greater than zero")]
    ZeroSteps,
    #[error("connection.max_send_attempts must be greater than zero")]
    ZeroSendAttempts,
}
