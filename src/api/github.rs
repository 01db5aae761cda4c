//! GitHub push endpoints
//!
//! - GET /github/github-bot
//! - POST /github/api/github/push

use axum::{
    Json, Router,
    extract::State,
    response::Html,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::metrics::GITHUB_PUSHES_TOTAL;
use crate::service::PushRequest;

/// Create GitHub router (nested under `/github`)
pub fn github_router() -> Router<AppState> {
    Router::new()
        .route("/github-bot", get(github_bot_page))
        .route("/api/github/push", post(push))
}

/// GET /github/github-bot
///
/// Form posting to the push endpoint.
async fn github_bot_page(CurrentUser(identity): CurrentUser) -> Html<String> {
    let user = identity
        .display_name
        .as_deref()
        .unwrap_or(&identity.subject_id);
    let notice = if identity.provider_access_token.is_some() {
        ""
    } else {
        r#"<p><strong>Pushing requires a GitHub login.</strong> <a href="/auth/login/github">Sign in with GitHub</a></p>"#
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>GitHub Bot - Gatehouse</title></head>
<body>
    <h1>GitHub Bot</h1>
    <p>Signed in as {user}</p>
    {notice}
    <form id="push">
        <label>Repository (owner/repo) <input name="repository" required></label><br>
        <label>Branch <input name="branch" value="main"></label><br>
        <label>File path <input name="path" required></label><br>
        <label>Commit message <input name="message" required></label><br>
        <label>Content <textarea name="content"></textarea></label><br>
        <button type="submit">Push</button>
    </form>
    <pre id="result"></pre>
    <script>
    document.getElementById("push").addEventListener("submit", async (event) => {{
        event.preventDefault();
        const body = Object.fromEntries(new FormData(event.target));
        const response = await fetch("/github/api/github/push", {{
            method: "POST",
            headers: {{ "Content-Type": "application/json" }},
            body: JSON.stringify(body),
        }});
        document.getElementById("result").textContent = await response.text();
    }});
    </script>
</body>
</html>
"#,
        user = html_escape::encode_text(user),
    ))
}

/// POST /github/api/github/push
async fn push(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Json(request): Json<PushRequest>,
) -> Result<Json<Value>, AppError> {
    match state.github.push_file(&identity, &request).await {
        Ok(outcome) => {
            GITHUB_PUSHES_TOTAL.with_label_values(&["success"]).inc();
            Ok(Json(json!({
                "message": "Successfully pushed to GitHub",
                "created": outcome.created,
                "commit_sha": outcome.commit_sha,
            })))
        }
        Err(error) => {
            GITHUB_PUSHES_TOTAL.with_label_values(&[error.kind()]).inc();
            Err(error)
        }
    }
}
