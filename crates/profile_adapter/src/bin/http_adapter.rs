#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use profile_adapter::{
    AdapterConfigResponse, AdapterHealthResponse, AdapterRuntime, ProfileActionResponse,
};
use profile_kernel_contracts::profile::ProfileDraft;
use profile_os::profile_ctl::{ProfileActionError, ViewState};
use tracing_subscriber::EnvFilter;

type SharedRuntime = State<Arc<AdapterRuntime>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = Arc::new(AdapterRuntime::default_from_env()?);
    let addr = runtime.config().http_bind;
    let _identity_pump = runtime.controller().spawn_identity_pump();

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/state", get(view_state))
        .route("/v1/config", get(config))
        .route("/v1/auth/login", post(log_in))
        .route("/v1/auth/signup", post(sign_up))
        .route("/v1/auth/logout", post(log_out))
        .route("/v1/profile/load", post(load_profile))
        .route("/v1/profile/create", post(create_profile))
        .route("/v1/profile/update", post(update_profile))
        .route("/v1/transaction/dismiss", post(dismiss_transaction))
        .with_state(runtime.clone());

    tracing::info!(
        %addr,
        chain_mode = runtime.chain_mode().as_str(),
        "profile_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn reply(
    runtime: &AdapterRuntime,
    result: Result<ProfileActionResponse, ProfileActionError>,
) -> (StatusCode, Json<ProfileActionResponse>) {
    let (status, body) = runtime.respond(result);
    (status, Json(body))
}

async fn healthz(State(runtime): SharedRuntime) -> (StatusCode, Json<AdapterHealthResponse>) {
    (StatusCode::OK, Json(runtime.health_report()))
}

async fn view_state(State(runtime): SharedRuntime) -> Json<ViewState> {
    Json(runtime.state())
}

async fn config(State(runtime): SharedRuntime) -> Json<AdapterConfigResponse> {
    Json(runtime.config_report())
}

async fn log_in(State(runtime): SharedRuntime) -> (StatusCode, Json<ProfileActionResponse>) {
    reply(&runtime, runtime.log_in().await)
}

async fn sign_up(State(runtime): SharedRuntime) -> (StatusCode, Json<ProfileActionResponse>) {
    reply(&runtime, runtime.sign_up().await)
}

async fn log_out(State(runtime): SharedRuntime) -> (StatusCode, Json<ProfileActionResponse>) {
    reply(&runtime, runtime.log_out().await)
}

async fn load_profile(State(runtime): SharedRuntime) -> (StatusCode, Json<ProfileActionResponse>) {
    reply(&runtime, runtime.load_profile().await)
}

async fn create_profile(
    State(runtime): SharedRuntime,
) -> (StatusCode, Json<ProfileActionResponse>) {
    reply(&runtime, runtime.create_profile().await)
}

async fn update_profile(
    State(runtime): SharedRuntime,
    Json(draft): Json<ProfileDraft>,
) -> (StatusCode, Json<ProfileActionResponse>) {
    reply(&runtime, runtime.update_profile(draft).await)
}

async fn dismiss_transaction(
    State(runtime): SharedRuntime,
) -> (StatusCode, Json<ProfileActionResponse>) {
    (StatusCode::OK, Json(runtime.dismiss_transaction()))
}
