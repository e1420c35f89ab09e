//! JSON-RPC method handlers.
//!
//! Each handler parses its params, calls the orchestrator and serializes the
//! answer. Daemon errors become application error objects carrying the
//! error code name and a recovery hint.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::generation::TaskResult;
use crate::store::ListQuery;
use crate::types::{ExtendParams, GenerationParams};

use super::server::ServerState;
use super::types::{
    CoverResult, GenerateCoverParams, GetBackendsResult, IdParams, JsonRpcError, ListPipelinesResult,
    ListResult, RemixParams, SubmitResult, TaskResultResponse, TokenParams,
};

type MethodResult = Result<serde_json::Value, JsonRpcError>;

/// Handles a JSON-RPC method call.
pub async fn handle_request(method: &str, params: serde_json::Value, state: &ServerState) -> MethodResult {
    match method {
        "generate" => handle_generate(params, state).await,
        "extend" => handle_extend(params, state).await,
        "remix" => handle_remix(params, state).await,
        "toggle_like" => handle_toggle_like(params, state).await,
        "cancel" => handle_cancel(params, state),
        "task_status" => handle_task_status(params, state).await,
        "task_result" => handle_task_result(params, state).await,
        "get_generation" => handle_get_generation(params, state).await,
        "list_generations" => handle_list_generations(params, state).await,
        "delete_generation" => handle_delete_generation(params, state).await,
        "generate_cover" => handle_generate_cover(params, state).await,
        "get_backends" => handle_get_backends(state),
        "list_pipelines" => handle_list_pipelines(state),
        "reload_config" => handle_reload_config(state),
        "ping" => handle_ping(state),
        "shutdown" => handle_shutdown(state),
        _ => Err(JsonRpcError::method_not_found(method)),
    }
}

fn parse<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
}

fn to_value<T: Serialize>(value: T) -> MethodResult {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::internal_error(format!("Serialization failed: {}", e)))
}

async fn handle_generate(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: GenerationParams = parse(params)?;
    let job = state.orchestrator.create_generation(params).await?;
    to_value(SubmitResult::from_job(&job))
}

async fn handle_extend(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: ExtendParams = parse(params)?;
    let job = state.orchestrator.extend(params).await?;
    to_value(SubmitResult::from_job(&job))
}

async fn handle_remix(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: RemixParams = parse(params)?;
    let job = state
        .orchestrator
        .remix(params.parent_id, params.overrides)
        .await?;
    to_value(SubmitResult::from_job(&job))
}

async fn handle_toggle_like(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let IdParams { id } = parse(params)?;
    let liked = state.orchestrator.toggle_like(id).await?;
    Ok(serde_json::json!({ "id": id, "liked": liked }))
}

fn handle_cancel(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let TokenParams { token } = parse(params)?;
    let cancelled = state.orchestrator.cancel_task(&token);
    Ok(serde_json::json!({ "token": token, "cancelled": cancelled }))
}

async fn handle_task_status(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let TokenParams { token } = parse(params)?;
    to_value(state.orchestrator.status(&token).await?)
}

async fn handle_task_result(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let TokenParams { token } = parse(params)?;
    let response = match state.orchestrator.result(&token).await? {
        TaskResult::Pending(status) => TaskResultResponse::Processing {
            status: status.status.to_string(),
            progress: status.progress,
            message: status.message,
        },
        TaskResult::Finished(job) => TaskResultResponse::Finished { job },
    };
    to_value(response)
}

async fn handle_get_generation(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let IdParams { id } = parse(params)?;
    to_value(state.orchestrator.get(id).await?)
}

async fn handle_list_generations(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let query: ListQuery = if params.is_null() {
        ListQuery::default()
    } else {
        parse(params)?
    };
    let (items, total) = state.orchestrator.list(&query).await?;
    to_value(ListResult {
        items,
        total,
        offset: query.offset,
        limit: query.effective_limit(),
    })
}

async fn handle_delete_generation(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let IdParams { id } = parse(params)?;
    state.orchestrator.delete(id).await?;
    Ok(serde_json::json!({ "id": id, "deleted": true }))
}

async fn handle_generate_cover(params: serde_json::Value, state: &ServerState) -> MethodResult {
    let params: GenerateCoverParams = parse(params)?;
    let (cover_art_path, cover_art_prompt) = state
        .orchestrator
        .generate_cover_for_existing(params.id, params.overrides)
        .await?;
    to_value(CoverResult {
        cover_art_path,
        cover_art_prompt,
    })
}

fn handle_get_backends(state: &ServerState) -> MethodResult {
    to_value(GetBackendsResult {
        backends: state.orchestrator.list_backends(),
    })
}

fn handle_list_pipelines(state: &ServerState) -> MethodResult {
    let (pipelines, active) = state.orchestrator.list_pipelines();
    to_value(ListPipelinesResult { pipelines, active })
}

/// Re-reads the config file and swaps routes in place.
fn handle_reload_config(state: &ServerState) -> MethodResult {
    let fresh = state.config().reload()?;
    state.orchestrator.reload(&fresh)?;
    let pipeline = fresh.generation.pipeline.clone();
    state.set_config(fresh);
    Ok(serde_json::json!({
        "status": "reloaded",
        "pipeline": pipeline,
        "backends": state.orchestrator.list_backends().len(),
    }))
}

/// Handles the ping method for health checks.
fn handle_ping(state: &ServerState) -> MethodResult {
    Ok(serde_json::json!({
        "status": "ok",
        "running": state.orchestrator.running_count(),
    }))
}

/// Handles the shutdown method.
fn handle_shutdown(state: &ServerState) -> MethodResult {
    state.shutdown();
    Ok(serde_json::json!({ "status": "shutting_down" }))
}
