use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    response::Html,
    routing::{get, post},
};
use serde::Serialize;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::{AppConfig, ControlBounds, GenerationDefaults},
    error::ServiceError,
    generator::{self, PROMPT_WINDOW},
    model::{
        ArtifactLoader, GenerationRequest, GenerationResponse, ModelMetadata, ModelRegistry,
        RiddleForm,
    },
};

const INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub loader: Arc<dyn ArtifactLoader>,
}

#[derive(Serialize)]
struct SettingsResponse {
    defaults: GenerationDefaults,
    bounds: ControlBounds,
    model_path: String,
    prompt_window: usize,
}

pub fn build_router(
    config: Arc<AppConfig>,
    registry: Arc<ModelRegistry>,
    loader: Arc<dyn ArtifactLoader>,
) -> Router {
    let state = AppState {
        config,
        registry,
        loader,
    };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/settings", get(settings))
        .route("/generate", post(generate_riddle))
        .route("/metadata", get(metadata))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> &'static str {
    "ok"
}

async fn settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        defaults: state.config.defaults.clone(),
        bounds: ControlBounds::standard(),
        model_path: state.config.model_path.display().to_string(),
        prompt_window: PROMPT_WINDOW,
    })
}

async fn generate_riddle(
    State(state): State<AppState>,
    form: Result<Json<RiddleForm>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ServiceError> {
    let Json(form) = form.map_err(|rejection| ServiceError::BadRequest(rejection.body_text()))?;
    let request = resolve_request(form, &state.config)?;
    info!(
        max_new_tokens = request.max_new_tokens,
        top_k = request.top_k,
        top_p = request.top_p,
        seeded = request.seed.is_some(),
        "generating riddle"
    );

    let response = task::spawn_blocking(move || {
        let handle = state
            .registry
            .get_or_load(&state.config.model_path, state.loader.as_ref())?;
        generator::generate(&request, &handle)
    })
    .await
    .map_err(|err| ServiceError::Generation(format!("generation task failed: {err}")))??;

    Ok(Json(response))
}

async fn metadata(State(state): State<AppState>) -> Result<Json<ModelMetadata>, ServiceError> {
    state
        .registry
        .cached(&state.config.model_path)
        .map(|handle| Json(handle.metadata()))
        .ok_or(ServiceError::ModelNotLoaded)
}

/// Applies configured defaults to omitted fields and enforces the sidebar bounds.
pub fn resolve_request(
    form: RiddleForm,
    config: &AppConfig,
) -> Result<GenerationRequest, ServiceError> {
    let defaults = &config.defaults;
    let bounds = ControlBounds::standard();

    let max_new_tokens = form.max_new_tokens.unwrap_or(defaults.max_new_tokens);
    if !bounds.max_new_tokens.contains(max_new_tokens) {
        return Err(ServiceError::BadRequest(format!(
            "max_new_tokens must be in [{}, {}], got {max_new_tokens}",
            bounds.max_new_tokens.min, bounds.max_new_tokens.max
        )));
    }
    let top_k = form.top_k.unwrap_or(defaults.top_k);
    if !bounds.top_k.contains(top_k) {
        return Err(ServiceError::BadRequest(format!(
            "top_k must be in [{}, {}], got {top_k}",
            bounds.top_k.min, bounds.top_k.max
        )));
    }
    let top_p = form.top_p.unwrap_or(defaults.top_p);
    if !bounds.top_p.contains(top_p) {
        return Err(ServiceError::BadRequest(format!(
            "top_p must be in [{}, {}], got {top_p}",
            bounds.top_p.min, bounds.top_p.max
        )));
    }

    Ok(GenerationRequest {
        prompt: form.prompt.unwrap_or_else(|| defaults.prompt.clone()),
        max_new_tokens,
        top_k,
        top_p,
        seed: form.seed.or(config.seed),
    })
}
