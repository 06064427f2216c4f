//! One handler per tool-call operation.

use axum::extract::State;
use axum::Json;

use lyra_evidence::store::ViewName;
use lyra_evidence::Error;

use super::error::{ApiError, ApiResult};
use super::types::*;
use crate::kernel::{CandidateSelection, StatusDetail, TaskStatusReport};
use crate::server::app::AppState;

pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Json<CreateTaskResponse>> {
    let task = state.kernel.scheduler.create_task(&request.hypothesis).await?;
    Ok(Json(CreateTaskResponse { task_id: task.id }))
}

pub async fn queue_targets(
    State(state): State<AppState>,
    Json(request): Json<QueueTargetsRequest>,
) -> ApiResult<Json<QueueTargetsResponse>> {
    let accepted_count = state
        .kernel
        .scheduler
        .queue_targets(request.task_id, &request.targets)
        .await?;
    Ok(Json(QueueTargetsResponse { accepted_count }))
}

pub async fn queue_reference_candidates(
    State(state): State<AppState>,
    Json(request): Json<QueueReferenceCandidatesRequest>,
) -> ApiResult<Json<QueueReferenceCandidatesResponse>> {
    let selection = CandidateSelection {
        include_ids: request.include_ids,
        exclude_ids: request.exclude_ids,
        limit: request.limit,
        dry_run: request.dry_run,
    };
    let (accepted_count, preview) = state
        .kernel
        .scheduler
        .queue_reference_candidates(request.task_id, selection)
        .await?;
    Ok(Json(QueueReferenceCandidatesResponse {
        accepted_count,
        preview,
    }))
}

pub async fn get_status(
    State(state): State<AppState>,
    Json(request): Json<GetStatusRequest>,
) -> ApiResult<Json<TaskStatusReport>> {
    let detail = match request.detail {
        DetailLevel::Summary => StatusDetail::Summary,
        DetailLevel::Full => StatusDetail::Full,
    };
    // Waits are cooperative and bounded; the handler releases the runtime
    // while it sleeps.
    let wait = request.wait.min(120);
    let report = state
        .kernel
        .scheduler
        .status_wait(request.task_id, wait, detail)
        .await?;
    Ok(Json(report))
}

pub async fn get_auth_queue(
    State(state): State<AppState>,
    Json(request): Json<GetAuthQueueRequest>,
) -> ApiResult<Json<GetAuthQueueResponse>> {
    let entries = state
        .kernel
        .scheduler
        .auth_queue(request.task_id)
        .await?
        .into_iter()
        .map(|(domain, url)| AuthQueueEntry { domain, url })
        .collect();
    Ok(Json(GetAuthQueueResponse { entries }))
}

pub async fn resolve_auth(
    State(state): State<AppState>,
    Json(request): Json<ResolveAuthRequest>,
) -> ApiResult<Json<ResolveAuthResponse>> {
    let resolved_count = state
        .kernel
        .scheduler
        .resolve_auth(&request.action, &request.domain)
        .await?;
    Ok(Json(ResolveAuthResponse { resolved_count }))
}

pub async fn stop_task(
    State(state): State<AppState>,
    Json(request): Json<StopTaskRequest>,
) -> ApiResult<Json<StopTaskResponse>> {
    let task = state.kernel.scheduler.stop_task(request.task_id).await?;
    Ok(Json(StopTaskResponse {
        task_id: task.id,
        status: task.status,
    }))
}

pub async fn query_view(
    State(state): State<AppState>,
    Json(request): Json<QueryViewRequest>,
) -> ApiResult<Json<lyra_evidence::store::ViewPage>> {
    let view = ViewName::parse(&request.name)?;
    let page = state
        .kernel
        .store
        .query_view(view, request.task_id, request.limit, request.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

pub async fn query_sql(
    State(state): State<AppState>,
    Json(request): Json<QuerySqlRequest>,
) -> ApiResult<Json<QuerySqlResponse>> {
    let rows = state.kernel.store.query_sql(&request.sql, request.limit).await?;
    Ok(Json(QuerySqlResponse { rows }))
}

pub async fn vector_search(
    State(state): State<AppState>,
    Json(request): Json<VectorSearchRequest>,
) -> ApiResult<Json<VectorSearchResponse>> {
    if request.k == 0 {
        return Err(ApiError(Error::InvalidArgument("k must be positive".into())));
    }
    let hits = state
        .kernel
        .vector_search(&request.query, request.target, request.task_id, request.k)
        .await?;
    Ok(Json(VectorSearchResponse { hits }))
}

pub async fn feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<FeedbackResponse>> {
    let updated_count = state
        .kernel
        .scheduler
        .apply_feedback(&request.action, &request.ids, request.correction.as_deref())
        .await?;
    Ok(Json(FeedbackResponse { updated_count }))
}
