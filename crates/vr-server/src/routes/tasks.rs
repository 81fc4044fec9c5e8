//! Background task records.

use axum::extract::{Path, State};
use axum::Json;

use vr_core::tasks::TaskRecord;
use vr_core::TaskId;

use crate::context::AppContext;
use crate::error::AppError;

/// GET /tasks/{id}
pub async fn get_task(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, AppError> {
    let task_id: TaskId = id
        .parse()
        .map_err(|_| vr_core::Error::Validation("Invalid task ID".into()))?;

    let record = ctx
        .tasks
        .get(task_id)
        .ok_or_else(|| vr_core::Error::not_found("task", task_id))?;

    Ok(Json(record))
}
