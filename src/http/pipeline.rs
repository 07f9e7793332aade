//! Pipeline assembly.
//!
//! The pipeline is an explicit, ordered list of [`Stage`]s decided once from
//! the configuration ([`plan`]). A fixed executor folds the list into one
//! axum [`Router`]:
//!
//! ```text
//! plan:  AccessLog? SecurityHeaders JsonBody UrlencodedBody XssClean
//!        MongoSanitize Compression Preflight Cors Authentication
//!        AuthRateLimit? | Diagnostic BusinessRoutes? NotFound |
//!        ErrorConverter ErrorHandler
//!
//! served (outermost first):
//!        AccessLog → ErrorHandler → ErrorConverter → SecurityHeaders → …
//!        → AuthRateLimit → routes { "/" , "/v1/…" , fallback 404 }
//! ```
//!
//! Route stages become the innermost router. The error tail wraps every
//! other stage so whatever they raise reaches it; it sits directly inside
//! the access log, which records the final rendered status.

use std::fmt;
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::predicate::{DefaultPredicate, Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::config::{AppConfig, Environment};
use crate::http::body::{self, BodyLimit};
use crate::http::diagnostic::{connection_report, DiagnosticState};
use crate::http::tail::{self, not_found, ErrorReporting};
use crate::observability::logging::{AccessLogger, AccessSpan};
use crate::security::auth::Authenticator;
use crate::security::rate_limit::{self, RateLimiterState};
use crate::security::{cors, headers, sanitize};

/// Responses smaller than this are sent uncompressed.
pub const COMPRESSION_THRESHOLD: u16 = 1024;

/// Prefix the business router is mounted under.
pub const BUSINESS_PREFIX: &str = "/v1";

/// One unit of the request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    AccessLog,
    SecurityHeaders,
    JsonBody,
    UrlencodedBody,
    XssClean,
    MongoSanitize,
    Compression,
    Cors,
    Preflight,
    Authentication,
    AuthRateLimit,
    Diagnostic,
    BusinessRoutes,
    NotFound,
    ErrorConverter,
    ErrorHandler,
}

/// Where the executor puts a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Wraps everything attached after it.
    Layer,
    /// Part of the innermost router.
    Route,
    /// Wraps every layer so it receives what they raise.
    ErrorTail,
}

impl Stage {
    pub fn placement(self) -> Placement {
        match self {
            Stage::Diagnostic | Stage::BusinessRoutes | Stage::NotFound => Placement::Route,
            Stage::ErrorConverter | Stage::ErrorHandler => Placement::ErrorTail,
            _ => Placement::Layer,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::AccessLog => "access-log",
            Stage::SecurityHeaders => "security-headers",
            Stage::JsonBody => "json-body",
            Stage::UrlencodedBody => "urlencoded-body",
            Stage::XssClean => "xss-clean",
            Stage::MongoSanitize => "mongo-sanitize",
            Stage::Compression => "compression",
            Stage::Cors => "cors",
            Stage::Preflight => "preflight",
            Stage::Authentication => "authentication",
            Stage::AuthRateLimit => "auth-rate-limit",
            Stage::Diagnostic => "diagnostic",
            Stage::BusinessRoutes => "business-routes",
            Stage::NotFound => "not-found",
            Stage::ErrorConverter => "error-converter",
            Stage::ErrorHandler => "error-handler",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The stage list for `config`, in attachment order.
///
/// Access logging is skipped in test; the auth rate limiter only exists in
/// production; business routes only when a router is mounted.
pub fn plan(config: &AppConfig, business_routes: bool) -> Vec<Stage> {
    let mut stages = Vec::with_capacity(16);

    if config.environment != Environment::Test {
        stages.push(Stage::AccessLog);
    }
    stages.extend([
        Stage::SecurityHeaders,
        Stage::JsonBody,
        Stage::UrlencodedBody,
        Stage::XssClean,
        Stage::MongoSanitize,
        Stage::Compression,
        Stage::Preflight,
        Stage::Cors,
        Stage::Authentication,
    ]);
    if config.environment.is_production() {
        stages.push(Stage::AuthRateLimit);
    }
    stages.push(Stage::Diagnostic);
    if business_routes {
        stages.push(Stage::BusinessRoutes);
    }
    stages.extend([Stage::NotFound, Stage::ErrorConverter, Stage::ErrorHandler]);

    stages
}

/// Wrapping order of the non-route stages, outermost first.
fn wrapping_order(stages: &[Stage]) -> Vec<Stage> {
    let mut order: Vec<Stage> = stages
        .iter()
        .copied()
        .filter(|s| s.placement() == Placement::Layer)
        .collect();

    let at = usize::from(order.first() == Some(&Stage::AccessLog));
    // Inserting each tail stage at the same index reverses them: the
    // handler ends up outside the converter.
    for stage in stages
        .iter()
        .copied()
        .filter(|s| s.placement() == Placement::ErrorTail)
    {
        order.insert(at, stage);
    }
    order
}

/// Builds an [`Application`] from a configuration and an optional business
/// router.
pub struct ApplicationBuilder {
    config: AppConfig,
    business: Option<Router>,
}

impl ApplicationBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            business: None,
        }
    }

    /// Mount `router` under `/v1`.
    pub fn mount_v1(mut self, router: Router) -> Self {
        self.business = Some(router);
        self
    }

    pub fn build(self) -> Application {
        let stages = plan(&self.config, self.business.is_some());
        let assembler = Assembler::new(&self.config);

        let mut business = self.business;
        let mut routes = Router::new();
        for stage in stages.iter().filter(|s| s.placement() == Placement::Route) {
            routes = assembler.route(routes, *stage, &mut business);
        }

        // Handler panics become raised errors right at the routes, so the
        // 500 passes back out through every stage like any other error.
        let routes = routes.layer(CatchPanicLayer::custom(tail::panic_response));

        let router = wrapping_order(&stages)
            .into_iter()
            .rev()
            .fold(routes, |router, stage| assembler.layer(router, stage));

        tracing::debug!(
            environment = %self.config.environment,
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Pipeline assembled"
        );

        Application {
            stages: stages.into(),
            environment: self.config.environment,
            router,
        }
    }
}

/// Build the pipeline for `config` with no business routes mounted.
pub fn build_application(config: &AppConfig) -> Application {
    ApplicationBuilder::new(config.clone()).build()
}

/// Per-instance collaborators. Nothing here is shared between two
/// applications.
struct Assembler {
    environment: Environment,
    trust_forwarded: bool,
    body_limit: BodyLimit,
    authenticator: Authenticator,
    limiter: Arc<RateLimiterState>,
}

impl Assembler {
    fn new(config: &AppConfig) -> Self {
        Self {
            environment: config.environment,
            trust_forwarded: config.proxy.trust_forwarded,
            body_limit: BodyLimit(config.body.limit_bytes),
            authenticator: Authenticator::from_config(&config.jwt),
            limiter: Arc::new(RateLimiterState::new(
                &config.rate_limit,
                config.proxy.trust_forwarded,
            )),
        }
    }

    fn route(&self, router: Router, stage: Stage, business: &mut Option<Router>) -> Router {
        match stage {
            Stage::Diagnostic => router.route(
                "/",
                get(connection_report)
                    .fallback(not_found)
                    .with_state(DiagnosticState {
                        trust_forwarded: self.trust_forwarded,
                    }),
            ),
            Stage::BusinessRoutes => match business.take() {
                Some(v1) => router.nest(BUSINESS_PREFIX, v1),
                None => router,
            },
            Stage::NotFound => router.fallback(not_found),
            _ => router,
        }
    }

    fn layer(&self, router: Router, stage: Stage) -> Router {
        match stage {
            Stage::AccessLog => router.layer(
                TraceLayer::new_for_http()
                    .make_span_with(AccessSpan::new(self.trust_forwarded))
                    .on_request(())
                    .on_response(AccessLogger)
                    .on_failure(()),
            ),
            Stage::SecurityHeaders => headers::apply(router),
            Stage::JsonBody => router.layer(from_fn_with_state(self.body_limit, body::parse_json)),
            Stage::UrlencodedBody => {
                router.layer(from_fn_with_state(self.body_limit, body::parse_urlencoded))
            }
            Stage::XssClean => router.layer(from_fn(sanitize::xss_clean)),
            Stage::MongoSanitize => router.layer(from_fn(sanitize::mongo_sanitize)),
            Stage::Compression => router.layer(
                CompressionLayer::new()
                    .compress_when(DefaultPredicate::new().and(SizeAbove::new(COMPRESSION_THRESHOLD))),
            ),
            Stage::Cors => router.layer(cors::cors_layer()),
            Stage::Preflight => router.layer(from_fn(cors::preflight)),
            Stage::Authentication => router.layer(Extension(self.authenticator.clone())),
            Stage::AuthRateLimit => router.layer(from_fn_with_state(
                self.limiter.clone(),
                rate_limit::auth_rate_limit,
            )),
            // Also catches panics raised by the stages themselves.
            Stage::ErrorConverter => router
                .layer(CatchPanicLayer::custom(tail::panic_response))
                .layer(from_fn(tail::convert_errors)),
            Stage::ErrorHandler => router.layer(from_fn_with_state(
                ErrorReporting::new(self.environment),
                tail::handle_errors,
            )),
            Stage::Diagnostic | Stage::BusinessRoutes | Stage::NotFound => router,
        }
    }
}

/// An assembled pipeline. Cheap to clone; clones share the same stage
/// instances (and rate-limit counters).
#[derive(Clone)]
pub struct Application {
    stages: Arc<[Stage]>,
    environment: Environment,
    router: Router,
}

impl Application {
    /// Stages in attachment order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, request: Request) -> Response {
        match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("environment", &self.environment)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}
