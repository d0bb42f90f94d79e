//! HTTP facade
//!
//! Thin axum adapter over the registry, the executor, and the status probe:
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | POST | `/run` | run an inline program and/or registered programs by slug |
//! | GET | `/programs` | dump the registry keyed by slug |
//! | GET | `/status` | read every relay on one device |
//!
//! All error responses are `{"status": <code>, "message": "..."}` JSON.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::context::ClientContext;
use crate::error::{RelayError, RelayResult};
use crate::executor::run_program;
use crate::function::CoilStates;
use crate::probe::read_device_status;
use crate::program::{parse_program, Program, ADHOC_SLUG};
use crate::registry::ProgramRegistry;
use crate::transport::TransportOptions;

/// JSON body for every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
}

impl ErrorResponse {
    fn new(status: StatusCode, message: impl Into<String>) -> Response {
        let body = ErrorResponse {
            status: status.as_u16(),
            message: message.into(),
        };
        (status, Json(body)).into_response()
    }
}

/// Outcome of one program in a `/run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

/// Per-program result within a [`RunResponse`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramResult {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub execution_time_millis: i64,
    pub slug: String,
    pub program: Program,
}

/// Body of a successful `POST /run`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub results: Vec<ProgramResult>,
    /// Post-run relay states keyed by device address, one entry per unique
    /// address among the programs that ran successfully.
    pub status: BTreeMap<String, CoilStates>,
}

/// Shared handler state.
pub struct AppState {
    pub registry: ProgramRegistry,
    pub context: Arc<ClientContext>,
    pub config: ServerConfig,
    pub shutdown: CancellationToken,
}

/// The HTTP server: registry, shared client context, and router.
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Build the server and scan the program directory once.
    pub fn new(config: ServerConfig, shutdown: CancellationToken) -> Self {
        let registry = ProgramRegistry::new();
        registry.load_from_dir(&config.program_dir);

        Self {
            state: Arc::new(AppState {
                registry,
                context: Arc::new(ClientContext::new()),
                config,
                shutdown,
            }),
        }
    }

    /// Handler state, exposed for tests.
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Assemble the router with CORS applied to every route.
    pub fn router(state: Arc<AppState>) -> Router {
        let cors = cors_layer(&state.config.allow_origin);

        Router::new()
            .route("/run", post(handle_run).options(preflight))
            .route("/programs", get(handle_programs).options(preflight))
            .route("/status", get(handle_status).options(preflight))
            .layer(cors)
            .with_state(state)
    }

    /// Bind and serve until the shutdown token fires.
    pub async fn serve(self) -> RelayResult<()> {
        let bind_address = self.state.config.bind_address();
        let shutdown = self.state.shutdown.clone();
        let app = Self::router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(&bind_address)
            .await
            .map_err(|e| {
                RelayError::connection(format!("failed to bind to {bind_address}: {e}"))
            })?;

        info!(address = %bind_address, "starting server");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| RelayError::transport(format!("server error: {e}")))?;
        Ok(())
    }
}

fn cors_layer(allow_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if allow_origin == "*" {
        return layer.allow_origin(Any);
    }
    match allow_origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!(allow_origin, "ALLOW_ORIGIN is not a valid header value, allowing any origin");
            layer.allow_origin(Any)
        }
    }
}

/// Non-preflight OPTIONS probes get an empty 204; true CORS preflights are
/// answered by the CORS layer before reaching this handler.
async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `POST /run`
///
/// Accepts an optional inline program body and any number of repeated
/// `program=<slug>` query parameters. The body program runs first, then the
/// slugs in query order. A failed program does not stop the ones after it.
/// When every requested program has run, the final relay states of each
/// unique successful program's device are collected into the response.
async fn handle_run(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let debug_requested = query_flag(&params, "debug");

    let mut programs: Vec<Arc<Program>> = Vec::new();

    if !body.is_empty() {
        let mut program = match parse_program(&body) {
            Ok(program) => program,
            Err(e) => {
                return ErrorResponse::new(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to parse program: {e}"),
                )
            }
        };
        program.slug = ADHOC_SLUG.to_string();
        programs.push(Arc::new(program));
    }

    for (key, slug) in &params {
        if key != "program" {
            continue;
        }

        let program = match state.registry.get(slug) {
            Some(program) => program,
            None => match state.registry.load_new_from_disk(slug, &state.config.program_dir) {
                Ok(Some(program)) => program,
                Ok(None) => {
                    return ErrorResponse::new(
                        StatusCode::NOT_FOUND,
                        format!("Program '{slug}' not found"),
                    )
                }
                Err(e) => {
                    return ErrorResponse::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to load program: {e}"),
                    )
                }
            },
        };

        let program = match state.registry.reload_if_newer(&program) {
            Ok(program) => program,
            Err(e) => {
                return ErrorResponse::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to reload program: {e}"),
                )
            }
        };

        programs.push(program);
    }

    if programs.is_empty() {
        return ErrorResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error: no programs to run",
        );
    }

    let mut results = Vec::with_capacity(programs.len());
    let mut succeeded_addresses: Vec<String> = Vec::new();

    for program in &programs {
        let program = if debug_requested && !program.debug {
            let mut forced = (**program).clone();
            forced.debug = true;
            Arc::new(forced)
        } else {
            program.clone()
        };

        let start_time = Utc::now();
        let outcome = run_program(&program, state.context.clone(), &state.shutdown).await;
        let execution_time_millis = (Utc::now() - start_time).num_milliseconds();

        let (status, error) = match outcome {
            Ok(()) => {
                if !succeeded_addresses.contains(&program.address) {
                    succeeded_addresses.push(program.address.clone());
                }
                (RunStatus::Success, None)
            }
            Err(e) => {
                error!(slug = %program.slug, error = %e, "program run failed");
                (RunStatus::Error, Some(e.to_string()))
            }
        };

        results.push(ProgramResult {
            status,
            error,
            start_time,
            execution_time_millis,
            slug: program.slug.clone(),
            program: (*program).clone(),
        });
    }

    let mut status_by_address = BTreeMap::new();
    for address in &succeeded_addresses {
        let states = match read_device_status(
            address,
            state.context.clone(),
            TransportOptions::default(),
            &state.shutdown,
        )
        .await
        {
            Ok(states) => states,
            Err(e) => {
                return ErrorResponse::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to get status after running programs: {e}"),
                )
            }
        };
        status_by_address.insert(address.clone(), states);
    }

    (
        StatusCode::OK,
        Json(RunResponse {
            results,
            status: status_by_address,
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    address: String,
    #[serde(default)]
    #[allow(dead_code)]
    debug: Option<String>,
}

/// `GET /status`: decoded coil states for one device.
async fn handle_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    if query.address.is_empty() {
        return ErrorResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read relay states: missing required query parameter 'address'",
        );
    }

    match read_device_status(
        &query.address,
        state.context.clone(),
        TransportOptions::default(),
        &state.shutdown,
    )
    .await
    {
        Ok(states) => (StatusCode::OK, Json(states)).into_response(),
        Err(e) => ErrorResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read relay states: {e}"),
        ),
    }
}

/// `GET /programs`: the whole registry keyed by slug.
async fn handle_programs(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.registry.snapshot())).into_response()
}

fn query_flag(params: &[(String, String)], name: &str) -> bool {
    params
        .iter()
        .any(|(key, value)| key == name && value == "true")
}
