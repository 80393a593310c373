//! Local JSON endpoints for the UI. Every response is HTTP 200 with either
//! `{"success": true, ...}` or `{"success": false, "error": {...}}`.

use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::info;

use crate::catalog::{CatalogClient, DEFAULT_NEWS_PAGE_SIZE};
use crate::config::{APP_NAME, APP_VERSION};
use crate::error::{error_map, CommandError, CommandResult, ErrorCode};
use crate::service::{LibraryHandle, SettingFlag};

#[derive(Clone)]
pub struct ApiState {
    pub library: LibraryHandle,
    pub catalog: CatalogClient,
    pub shutdown: Arc<Notify>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/data", get(get_data).post(save_data))
        .route("/api/games", post(add_game).patch(update_game))
        .route("/api/games/launch", post(launch_game))
        .route("/api/games/order", post(set_sort_order))
        .route("/api/games/:id", delete(delete_game))
        .route("/api/games/:id/favorite", post(toggle_favorite))
        .route("/api/games/:id/cover", delete(reset_cover))
        .route("/api/games/:id/cover/file", post(set_cover_file))
        .route("/api/games/:id/cover/url", post(set_cover_url))
        .route("/api/steam/detect", get(detect_steam_games))
        .route("/api/steam/import", post(import_steam_games))
        .route("/api/export", post(export_data))
        .route("/api/import", post(import_data))
        .route("/api/settings/always-on-top", post(toggle_always_on_top))
        .route("/api/settings/auto-start", post(toggle_auto_start))
        .route("/api/errors", get(get_error_map))
        .route("/api/app-info", get(get_app_info))
        .route("/api/discovery", get(get_discovery))
        .route("/api/news", get(get_news))
        .route("/api/shutdown", post(request_shutdown))
        .with_state(state)
}

fn success(payload: Value) -> Json<Value> {
    let mut body = json!({ "success": true });
    if let (Some(map), Value::Object(extra)) = (body.as_object_mut(), payload) {
        map.extend(extra);
    }
    Json(body)
}

fn failure(err: CommandError) -> Json<Value> {
    Json(json!({ "success": false, "error": err }))
}

fn respond<T>(result: CommandResult<T>, payload: impl FnOnce(T) -> Value) -> Json<Value> {
    match result {
        Ok(value) => success(payload(value)),
        Err(err) => failure(err),
    }
}

fn to_json(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

type Body = Result<Json<Value>, JsonRejection>;

/// Decodes a request body, turning malformed input into a `code` failure
/// instead of an HTTP rejection.
fn parse_body<T: DeserializeOwned>(body: Body, code: ErrorCode) -> CommandResult<T> {
    let invalid = |details: String| {
        CommandError::new(code)
            .with_context("request body")
            .with_details(details)
    };
    let Json(value) = body.map_err(|rejection| invalid(rejection.body_text()))?;
    serde_json::from_value(value).map_err(|err| invalid(err.to_string()))
}

async fn get_data(State(state): State<ApiState>) -> Json<Value> {
    match state.library.get_data().await {
        Ok(document) => Json(document.to_value()),
        Err(err) => failure(err),
    }
}

async fn save_data(State(state): State<ApiState>, body: Body) -> Json<Value> {
    let saved = match body {
        Ok(Json(raw)) => state.library.save_data(raw).await,
        Err(_) => false,
    };
    Json(json!({ "success": saved }))
}

async fn launch_game(State(state): State<ApiState>, body: Body) -> Json<Value> {
    let request: Value = match parse_body(body, ErrorCode::InvalidLaunch) {
        Ok(request) => request,
        Err(err) => return failure(err),
    };
    let result = state.library.launch_game(request).await;
    respond(result, |pid| json!({ "pid": pid }))
}

async fn toggle_favorite(State(state): State<ApiState>, Path(id): Path<u64>) -> Json<Value> {
    let result = state.library.toggle_favorite(id).await;
    respond(result, |favorite| json!({ "favorite": favorite }))
}

async fn update_game(State(state): State<ApiState>, body: Body) -> Json<Value> {
    let patch: Value = match parse_body(body, ErrorCode::GameNotFound) {
        Ok(patch) => patch,
        Err(err) => return failure(err),
    };
    let result = state.library.update_game(patch).await;
    respond(result, |game| json!({ "game": to_json(game) }))
}

async fn add_game(State(state): State<ApiState>, body: Body) -> Json<Value> {
    let candidate: Value = match parse_body(body, ErrorCode::Unknown) {
        Ok(candidate) => candidate,
        Err(err) => return failure(err),
    };
    let result = state.library.add_game(candidate).await;
    respond(result, |game| json!({ "game": to_json(game) }))
}

async fn delete_game(State(state): State<ApiState>, Path(id): Path<u64>) -> Json<Value> {
    let result = state.library.delete_game(id).await;
    respond(result, |()| json!({}))
}

#[derive(Deserialize)]
struct SortOrderBody {
    #[serde(default)]
    ids: Vec<u64>,
}

async fn set_sort_order(State(state): State<ApiState>, body: Body) -> Json<Value> {
    let body: SortOrderBody = match parse_body(body, ErrorCode::Unknown) {
        Ok(body) => body,
        Err(err) => return failure(err),
    };
    let result = state.library.set_sort_order(body.ids).await;
    respond(result, |saved| json!({ "saved": saved }))
}

async fn detect_steam_games(State(state): State<ApiState>) -> Json<Value> {
    match state.library.detect_steam_games().await {
        Ok(games) => success(json!({ "games": to_json(games) })),
        Err(err) => Json(json!({ "success": false, "error": err, "games": [] })),
    }
}

#[derive(Deserialize)]
struct ImportGamesBody {
    #[serde(default)]
    games: Vec<Value>,
}

async fn import_steam_games(State(state): State<ApiState>, body: Body) -> Json<Value> {
    let body: ImportGamesBody = match parse_body(body, ErrorCode::ImportFail) {
        Ok(body) => body,
        Err(err) => return failure(err),
    };
    let result = state.library.import_steam_games(body.games).await;
    respond(result, to_json)
}

#[derive(Deserialize)]
struct FileBody {
    #[serde(default)]
    path: Option<PathBuf>,
}

async fn export_data(State(state): State<ApiState>, body: Body) -> Json<Value> {
    // No body at all means the default backup location.
    let target = match body {
        Err(JsonRejection::MissingJsonContentType(_)) => None,
        body => match parse_body::<FileBody>(body, ErrorCode::ExportFail) {
            Ok(body) => body.path,
            Err(err) => return failure(err),
        },
    };
    let result = state.library.export_data(target).await;
    respond(result, |path| json!({ "path": path }))
}

async fn import_data(State(state): State<ApiState>, body: Body) -> Json<Value> {
    let body: FileBody = match parse_body(body, ErrorCode::ImportFail) {
        Ok(body) => body,
        Err(err) => return failure(err),
    };
    let Some(source) = body.path else {
        return failure(
            CommandError::new(ErrorCode::ImportFail).with_details("no file selected"),
        );
    };
    let result = state.library.import_data(source).await;
    respond(result, |document| json!({ "data": document.to_value() }))
}

async fn set_cover_file(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    body: Body,
) -> Json<Value> {
    let body: FileBody = match parse_body(body, ErrorCode::ImageInvalid) {
        Ok(body) => body,
        Err(err) => return failure(err),
    };
    let Some(source) = body.path else {
        return failure(
            CommandError::new(ErrorCode::ImageInvalid).with_details("no file selected"),
        );
    };
    let result = state.library.set_custom_cover_file(id, &source).await;
    respond(result, |cover_path| json!({ "coverPath": cover_path }))
}

#[derive(Deserialize)]
struct UrlBody {
    #[serde(default)]
    url: String,
}

async fn set_cover_url(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
    body: Body,
) -> Json<Value> {
    let body: UrlBody = match parse_body(body, ErrorCode::ImageDownloadFail) {
        Ok(body) => body,
        Err(err) => return failure(err),
    };
    let result = state.library.set_custom_cover_url(id, &body.url).await;
    respond(result, |cover_path| json!({ "coverPath": cover_path }))
}

async fn reset_cover(State(state): State<ApiState>, Path(id): Path<u64>) -> Json<Value> {
    let result = state.library.reset_custom_cover(id).await;
    respond(result, |()| json!({}))
}

#[derive(Deserialize)]
struct ToggleBody {
    #[serde(default)]
    enabled: bool,
}

async fn set_flag(state: &ApiState, flag: SettingFlag, body: Body) -> Json<Value> {
    let body: ToggleBody = match parse_body(body, ErrorCode::Unknown) {
        Ok(body) => body,
        Err(err) => return failure(err),
    };
    let result = state.library.set_flag(flag, body.enabled).await;
    respond(result, |enabled| json!({ "enabled": enabled }))
}

async fn toggle_always_on_top(State(state): State<ApiState>, body: Body) -> Json<Value> {
    set_flag(&state, SettingFlag::AlwaysOnTop, body).await
}

async fn toggle_auto_start(State(state): State<ApiState>, body: Body) -> Json<Value> {
    set_flag(&state, SettingFlag::AutoStart, body).await
}

async fn get_error_map() -> Json<Value> {
    Json(to_json(error_map()))
}

async fn get_app_info() -> Json<Value> {
    Json(json!({ "name": APP_NAME, "version": APP_VERSION }))
}

async fn get_discovery(State(state): State<ApiState>) -> Json<Value> {
    let result = state.catalog.discovery().await;
    respond(result, |discovery| json!({ "data": to_json(discovery) }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn get_news(State(state): State<ApiState>, Query(query): Query<NewsQuery>) -> Json<Value> {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_NEWS_PAGE_SIZE);
    let result = state.catalog.community_news(page, page_size).await;
    respond(result, to_json)
}

async fn request_shutdown(State(state): State<ApiState>) -> Json<Value> {
    info!("Shutdown requested over the API");
    state.shutdown.notify_one();
    success(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_merges_payload() {
        let Json(body) = success(json!({ "pid": 42 }));
        assert_eq!(body, json!({ "success": true, "pid": 42 }));
    }

    #[test]
    fn failure_carries_structured_error() {
        let Json(body) = failure(CommandError::new(ErrorCode::PathMismatch));
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["code"], json!("ERR_PATH_MISMATCH"));
        assert_eq!(body["error"]["retryable"], json!(false));
    }
}
