//! Core matrix-multiply offload protocol.
//!
//! This crate provides the framing codecs, the bit-serial transport state
//! machine, the handshake monitor and the offload driver that together move
//! two matrices into an external accelerator and bring the product back. It
//! also carries a behavioral model of the accelerator used by tests and the
//! host tools when no RTL simulation is attached.

use core::fmt;

/// Bit-exact word codec and header packing for the serial link.
///
/// Converts binary32 values to wire words without any normalization and
/// packs the `(tag, rows, cols)` header announcing each operand stream.
pub mod codec;

/// Bounds and timings applied to a single offload request.
///
/// Every wait the driver performs is bounded by a value held here; nothing
/// polls indefinitely.
pub mod config;

/// Offload driver facade and the transport seam.
///
/// Validates operand shapes before any I/O, runs the request through the
/// selected transport and checks the shape of the returned product.
pub mod driver;

/// Handshake flag polling with a caller-supplied iteration budget.
pub mod handshake;

/// Capability interface to the accelerator lines.
///
/// Abstracts the accelerator as `drive_line`, `sample_line` and
/// `advance_clock` over the enumerated line set, so the serial transport
/// runs unchanged against the behavioral model or a remote RTL simulation.
pub mod link;

/// Row-major `f32` matrix type and the software reference product.
pub mod matrix;

/// Bit-serial word transport over the four-wire link.
///
/// Shifts one 32-bit word per call, most-significant bit first, through an
/// explicit clock-phase state machine, and runs the full serial offload
/// sequence for the driver.
pub mod serial;

/// Ephemeral per-request protocol state.
pub mod session;

/// Cycle-stepped behavioral model of the matrix accelerator.
///
/// Honors the serial protocol: shifts words in on rising clock edges,
/// raises the load and done flags after configurable latencies and shifts
/// the product out after the result trigger.
pub mod sim;

pub use codec::{Header, Tag, UnknownTag, decode_header, encode_header, float_to_word, word_to_float};
pub use config::OffloadConfig;
pub use driver::{MatmulTransport, OffloadDriver};
pub use link::AcceleratorLink;
pub use matrix::Matrix;
pub use serial::SerialTransport;

/// Result alias used across the offload crates.
pub type Result<T> = core::result::Result<T, OffloadError>;

/// How long a bounded wait ran before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waited {
    /// Clock units polled on the serial link.
    Iterations(u32),
    /// Wall-clock milliseconds spent polling for an artifact.
    Millis(u64),
}

impl fmt::Display for Waited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Waited::Iterations(n) => write!(f, "{n} clock units"),
            Waited::Millis(ms) => write!(f, "{ms} ms"),
        }
    }
}

/// Failures returned by an offload request.
///
/// Any error means no product was produced and the accelerator state is
/// unknown; the caller must reset the accelerator before a new attempt.
/// Nothing in the driver retries internally.
#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    /// `A.cols != B.rows`. Detected before any transport I/O.
    #[error("shape mismatch: A is {a:?}, B is {b:?} (A.cols != B.rows)")]
    ShapeMismatch { a: (usize, usize), b: (usize, usize) },

    /// A dimension does not fit in the 12-bit header fields.
    #[error("shape {rows}x{cols} cannot be represented in a header (max 4095)")]
    ShapeOutOfRange { rows: usize, cols: usize },

    /// Values do not form a non-empty `rows x cols` matrix.
    #[error("invalid matrix: {rows}x{cols} with {len} values")]
    InvalidMatrix { rows: usize, cols: usize, len: usize },

    /// The accelerator or external step did not reach the expected state
    /// within its budget.
    #[error("timed out waiting for {target} after {waited}")]
    Timeout { target: String, waited: Waited },

    /// The batch external step exited unsuccessfully.
    #[error("external step failed (exit code {exit_code:?}): {stderr}")]
    ExternalStepFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The result artifact or received product is not well formed.
    #[error("malformed result: {reason}")]
    MalformedResult { reason: String },

    /// The link to the accelerator failed below the protocol level.
    #[error("accelerator link failed: {reason}")]
    Link { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl OffloadError {
    /// [`OffloadError::Timeout`] for `target` after `waited`.
    pub fn timeout(target: impl Into<String>, waited: Waited) -> Self {
        Self::Timeout {
            target: target.into(),
            waited,
        }
    }

    /// [`OffloadError::MalformedResult`] with `reason`.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResult {
            reason: reason.into(),
        }
    }

    /// [`OffloadError::Link`] with `reason`.
    pub fn link(reason: impl Into<String>) -> Self {
        Self::Link {
            reason: reason.into(),
        }
    }

    /// True for failures detected before the accelerator was touched.
    pub fn is_contract_error(&self) -> bool {
        matches!(
            self,
            Self::ShapeMismatch { .. } | Self::ShapeOutOfRange { .. } | Self::InvalidMatrix { .. }
        )
    }
}
