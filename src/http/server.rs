//! HTTP server setup.
//!
//! # Responsibilities
//! - Assemble the pipeline from configuration
//! - Bind the pipeline to a listener, recording connection addresses
//! - Drain in-flight requests on shutdown

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::http::connection::ConnectionMeta;
use crate::http::pipeline::{build_application, Application};

/// HTTP server for one assembled pipeline.
pub struct HttpServer {
    application: Application,
}

impl HttpServer {
    /// Create a server with the pipeline for `config`.
    pub fn new(config: &AppConfig) -> Self {
        Self::from_application(build_application(config))
    }

    /// Serve an already assembled pipeline (e.g. one with business routes
    /// mounted).
    pub fn from_application(application: Application) -> Self {
        Self { application }
    }

    pub fn application(&self) -> &Application {
        &self.application
    }

    /// Run the server until `shutdown` fires, then finish in-flight
    /// requests and return.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = %self.application.environment(),
            stages = self.application.stages().len(),
            "HTTP server starting"
        );

        let app = self
            .application
            .into_router()
            .into_make_service_with_connect_info::<ConnectionMeta>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                // A dropped sender counts as a shutdown request too.
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
