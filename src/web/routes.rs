use super::{Result, WebError};
use crate::controller::ClosureController;
use crate::core::{
    AuthContext, Closure, ClosureDefinition, ClosurePatch, CreateClosureRequest, InputMap,
    StartRequest,
};
use crate::notify::{CallbackResponse, InMemoryTaskCallbacks, NotificationPipeline, TaskStatus};
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ApiState {
    controller: ClosureController,
    task_inbox: Arc<InMemoryTaskCallbacks>,
}

impl ApiState {
    pub fn new(controller: ClosureController, task_inbox: Arc<InMemoryTaskCallbacks>) -> Self {
        Self {
            controller,
            task_inbox,
        }
    }
}

/// Routes:
/// - `POST /definitions`, `GET /definitions/*link`
/// - `POST /closures`, `POST /closures/run`
/// - `GET|PUT|PATCH /closures/:id`, `POST /closures/:id/start`
/// - `GET /request-status/:id`
/// - `GET /tasks/:id`
pub fn closure_router(state: ApiState) -> Router {
    Router::new()
        .route("/definitions", post(put_definition))
        .route("/definitions/*link", get(get_definition))
        .route("/closures", post(create_closure))
        .route("/closures/run", post(run_closure))
        .route(
            "/closures/:id",
            get(get_closure).put(append_inputs).patch(patch_closure),
        )
        .route("/closures/:id/start", post(start_closure))
        .route("/request-status/:id", get(get_request_status))
        .route("/tasks/:id", get(get_task_responses))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn auth_context(headers: &HeaderMap) -> AuthContext {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    match token {
        Some(token) => AuthContext::bearer(token),
        None => AuthContext::default(),
    }
}

async fn put_definition(
    State(state): State<ApiState>,
    Json(definition): Json<ClosureDefinition>,
) -> Result<(StatusCode, Json<ClosureDefinition>)> {
    if definition.link.trim().is_empty() {
        return Err(WebError::Input("definition link is required".to_string()));
    }
    let stored = state
        .controller
        .definitions()
        .put_definition(definition)
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn get_definition(
    State(state): State<ApiState>,
    Path(link): Path<String>,
) -> Result<Json<ClosureDefinition>> {
    let link = format!("/definitions/{}", link.trim_start_matches('/'));
    state
        .controller
        .definitions()
        .get_definition(&link)
        .await?
        .map(Json)
        .ok_or_else(|| WebError::NotFound(format!("definition '{link}' not found")))
}

async fn create_closure(
    State(state): State<ApiState>,
    Json(request): Json<CreateClosureRequest>,
) -> Result<(StatusCode, Json<Closure>)> {
    let created = state.controller.create(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn run_closure(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<CreateClosureRequest>,
) -> Result<(StatusCode, Json<Closure>)> {
    let started = state
        .controller
        .create_and_start(request, &auth_context(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(started)))
}

async fn get_closure(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Json<Closure>> {
    Ok(Json(state.controller.get(&id).await?))
}

async fn start_closure(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<StartRequest>>,
) -> Result<Json<Closure>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let started = state
        .controller
        .start(&id, request, &auth_context(&headers))
        .await?;
    Ok(Json(started))
}

#[derive(Debug, Deserialize)]
struct AppendInputsBody {
    #[serde(default)]
    inputs: InputMap,
}

async fn append_inputs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<AppendInputsBody>,
) -> Result<Json<Closure>> {
    Ok(Json(state.controller.append_inputs(&id, body.inputs).await?))
}

async fn patch_closure(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(patch): Json<ClosurePatch>,
) -> Result<Json<Closure>> {
    Ok(Json(state.controller.apply_patch(&id, patch).await?))
}

async fn get_request_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatus>> {
    let closure = state.controller.get(&id).await?;
    let link = NotificationPipeline::tracker_link(&closure);
    state
        .controller
        .notifications()
        .tracker()
        .get_status(&link)
        .await
        .map_err(|err| WebError::Internal(err.to_string()))?
        .map(Json)
        .ok_or_else(|| WebError::NotFound(format!("request status '{link}' not found")))
}

async fn get_task_responses(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Json<Vec<CallbackResponse>> {
    Json(state.task_inbox.responses(&format!("/tasks/{id}")).await)
}
