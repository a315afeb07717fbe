//! I/O for the batch offload path.
//!
//! Provides the textual request and result artifact formats, helpers for
//! loading and writing them from external tools, and the batch file
//! transport that hands a request to an external step and collects its
//! result.

/// Request and result artifact records.
///
/// Renders `M`, `K`, `N`, `A` and `B` lines for a request and the single
/// `C` line for a result, and turns parsed records back into matrices with
/// shape checks.
pub mod artifact;

/// Batch file transport.
///
/// Writes the request artifact into a request-scoped location, runs the
/// external step and polls with a bounded wait for the result artifact.
/// Any result artifact left from an earlier run is deleted before the new
/// request is written.
pub mod batch;

/// File helpers for tools acting as the external step.
///
/// Loads request artifacts and writes result artifacts atomically, so a
/// polling host never observes a half-written record.
pub mod loader;

/// Parser for the line-oriented artifact grammar.
pub mod parser;

pub use artifact::{RequestArtifact, ResultArtifact};
pub use batch::{BatchFileTransport, CommandStep, ExternalStep, RequestContext};
