use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::digest::{render_digest, Scheduler};
use crate::news::{Article, NewsClient};
use crate::preferences::{Preference, PreferenceError, PreferencesRequest};

/// Set by the authenticating proxy in front of this service
pub const USER_ID_HEADER: &str = "x-user-id";

/// Most categories one article preview may fan out to
pub const MAX_PREVIEW_CATEGORIES: usize = 10;

pub struct AppState {
    pub db: Arc<Database>,
    pub news: Arc<NewsClient>,
    pub scheduler: Arc<Scheduler>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/user-preferences",
            post(save_preferences)
                .get(get_preferences)
                .delete(delete_preferences),
        )
        .route("/api/articles", get(articles))
        .route("/digest/preview", get(digest_preview))
        .route("/dispatch", post(dispatch))
        .route("/dispatch/status", get(dispatch_status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// JSON error responses
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(&'static str),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "You must log in to save preferences".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<PreferenceError> for ApiError {
    fn from(err: PreferenceError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {}", err);
        ApiError::Internal("Internal server error".to_string())
    }
}

fn current_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub success: bool,
    pub message: &'static str,
    pub next_send_at: DateTime<Utc>,
}

// Route handlers
pub async fn save_preferences(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<PreferencesRequest>, JsonRejection>,
) -> Result<Json<SaveResponse>, ApiError> {
    let user_id = current_user(&headers)?;

    let Json(request) = body.map_err(|e| {
        warn!("Rejected preferences body: {}", e);
        ApiError::BadRequest("Invalid request body".to_string())
    })?;
    let prefs = request.validate()?;

    let next_send_at = prefs.frequency.next_send_at(Utc::now());
    if let Err(e) = state
        .db
        .upsert_preference(&user_id, &prefs, next_send_at)
        .await
    {
        error!("Error saving preferences: {}", e);
        return Err(ApiError::Internal("Failed to save preferences".to_string()));
    }

    info!(
        "Saved {} preferences for user '{}', next digest at {}",
        prefs.frequency, user_id, next_send_at
    );

    Ok(Json(SaveResponse {
        success: true,
        message: "Preferences saved successfully!",
        next_send_at,
    }))
}

pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Preference>, ApiError> {
    let user_id = current_user(&headers)?;

    state
        .db
        .get_preference(&user_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("No preferences saved"))
}

pub async fn delete_preferences(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = current_user(&headers)?;

    if !state.db.deactivate_preference(&user_id).await? {
        return Err(ApiError::NotFound("No preferences saved"));
    }

    info!("User '{}' unsubscribed", user_id);
    Ok(Json(json!({ "success": true, "message": "Unsubscribed" })))
}

#[derive(Deserialize)]
pub struct ArticlesQuery {
    /// Comma separated
    #[serde(default)]
    pub categories: String,
}

impl ArticlesQuery {
    pub fn category_list(&self) -> Vec<String> {
        self.categories
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub async fn articles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ArticlesQuery>,
) -> Result<Json<Vec<Article>>, ApiError> {
    current_user(&headers)?;

    let categories = query.category_list();
    if categories.len() > MAX_PREVIEW_CATEGORIES {
        return Err(ApiError::BadRequest(format!(
            "At most {} categories can be previewed at once",
            MAX_PREVIEW_CATEGORIES
        )));
    }

    Ok(Json(state.news.aggregate(&categories).await))
}

pub async fn digest_preview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Html<String>, ApiError> {
    let user_id = current_user(&headers)?;
    let pref = state
        .db
        .get_preference(&user_id)
        .await?
        .ok_or(ApiError::NotFound("No preferences saved"))?;

    let articles = state.news.aggregate(&pref.categories).await;
    let digest = render_digest(pref.frequency, &pref.categories, &articles)?;

    Ok(Html(digest.body))
}

pub async fn dispatch(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler.dispatch_due(Utc::now()).await {
            error!("Manual digest dispatch failed: {}", e);
        }
    });

    Json(json!({ "running": true }))
}

pub async fn dispatch_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let running = state.scheduler.is_running().await;
    Json(json!({ "running": running }))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
