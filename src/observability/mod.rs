//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request received
//!     → logging.rs (open access-log span: client, method, URL)
//!     → [pipeline handles request]
//!     → logging.rs (emit status and latency, error message on failure)
//! ```

pub mod logging;

pub use logging::init_tracing;
