//! External tool availability.

use axum::extract::State;
use axum::Json;

use crate::context::AppContext;

/// GET /tools
pub async fn list_tools(State(ctx): State<AppContext>) -> Json<Vec<vr_av::ToolInfo>> {
    Json(ctx.tools.check_all().await)
}
