//! Protected demo resources
//!
//! - GET /api/protected/data
//! - GET /api/protected/admin-only

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::AppState;
use crate::auth::CurrentUser;

/// Create protected resource router (nested under `/api`)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/protected/data", get(protected_data))
        .route("/protected/admin-only", get(admin_only))
}

/// GET /api/protected/data
async fn protected_data(CurrentUser(identity): CurrentUser) -> Json<Value> {
    Json(json!({
        "message": "This is protected data!",
        "user_id": identity.subject_id,
        "auth_type": identity.auth_type.as_str(),
        "user_name": identity.display_name,
        "data": {
            "items": ["item1", "item2", "item3"],
            "count": 3,
        },
    }))
}

/// GET /api/protected/admin-only
///
/// Any signed-in user may read this; the auth type label is not a role.
async fn admin_only(CurrentUser(identity): CurrentUser) -> Json<Value> {
    Json(json!({
        "message": "You have access to admin area",
        "user_id": identity.subject_id,
        "user_name": identity.display_name,
    }))
}
