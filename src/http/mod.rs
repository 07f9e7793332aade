//! HTTP request pipeline.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum serve, connection addresses)
//!     → pipeline.rs (ordered stages)
//!         → body.rs / form.rs (parse JSON and urlencoded bodies)
//!         → [security: headers, sanitizers, CORS, auth, rate limit]
//!         → diagnostic.rs ("/") | business routes ("/v1") | 404
//!     → tail.rs (convert and render raised errors)
//!     → Send to client
//! ```

pub mod body;
pub mod connection;
pub mod diagnostic;
pub mod form;
pub mod pipeline;
pub mod server;
pub mod tail;

pub use body::{BodyKind, ParsedBody};
pub use connection::{client_ip, ConnectionMeta};
pub use pipeline::{build_application, Application, ApplicationBuilder, Stage};
pub use server::HttpServer;
