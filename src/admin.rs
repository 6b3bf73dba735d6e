//! Dashboard routes: login gate, pages and JSON endpoints

use crate::config::Config;
use crate::host::{self, HostPaths};
use crate::logs;
use crate::netinfo;
use crate::pages;
use crate::session::{self, MemorySessionStore, SessionStore};
use crate::upgrade::{self, Phase, UpgradeTracker};
use anyhow::Context;
use axum::{
    body::Body,
    extract::{
        multipart::MultipartError, DefaultBodyLimit, Extension, Form, Multipart, Path, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

const LOGIN_FAILED: &str = "Login failed! Incorrect username or password.";
const LOGIN_FAILED_CODE: &str = "login_failed";
const DEFAULT_TAIL_LINES: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub upgrade: UpgradeTracker,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(MemorySessionStore::new(config.session_timeout()));
        Self::with_sessions(config, sessions)
    }

    pub fn with_sessions(config: Config, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            upgrade: UpgradeTracker::default(),
        }
    }

    fn host_paths(&self) -> HostPaths {
        HostPaths::from(&self.config.paths)
    }

    /// Username of the live session presented by the request, if any
    fn current_user(&self, headers: &HeaderMap) -> Option<String> {
        let token = session::token_from_headers(headers)?;
        self.sessions.get(&token).map(|s| s.username)
    }
}

/// Operator name attached to requests that passed the login gate
#[derive(Clone)]
struct CurrentUser(String);

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct LogQuery {
    file: Option<String>,
}

#[derive(Deserialize)]
struct TailQuery {
    lines: Option<usize>,
}

/// Create the dashboard router
pub fn dashboard_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes();

    let protected = Router::new()
        .route("/logout", get(logout_handler))
        .route("/status", get(status_handler))
        .route("/net", get(net_handler))
        .route("/config", get(config_handler))
        .route("/config/download", get(download_config))
        .route("/log", get(log_page_handler))
        .route("/logs", get(list_logs))
        .route("/logs/:filename", get(get_log))
        .route("/tail-log/:filename", get(tail_log))
        .route("/upgrade", get(upgrade_handler))
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/progress", get(progress_handler))
        .route("/upgrade/status", get(upgrade_status))
        .route("/reboot", post(reboot_handler))
        .route("/api/status", get(api_status))
        .route("/api/network", get(api_network))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_login));

    Router::new()
        .route("/", get(index_handler))
        .route("/login", post(login_handler))
        .route("/keepalive", get(keepalive_handler))
        .merge(protected)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_login(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match state.current_user(req.headers()) {
        Some(username) => {
            req.extensions_mut().insert(CurrentUser(username));
            next.run(req).await
        }
        None => Redirect::to("/").into_response(),
    }
}

/// Run blocking host reads off the async workers
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task panicked")?
}

fn internal_error(what: &str, err: anyhow::Error) -> Response {
    tracing::error!("{}: {:#}", what, err);
    (StatusCode::INTERNAL_SERVER_ERROR, what.to_string()).into_response()
}

fn redirect_with_cookie(cookie: String) -> Response {
    ([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response()
}

/// Text of a flash code carried by the flash cookie
fn flash_message(code: &str) -> Option<&'static str> {
    match code {
        LOGIN_FAILED_CODE => Some(LOGIN_FAILED),
        _ => None,
    }
}

async fn index_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(username) = state.current_user(&headers) {
        return Html(pages::main_page(&username)).into_response();
    }
    let Some(code) = session::flash_from_headers(&headers) else {
        return Html(pages::login_page(&[])).into_response();
    };
    let flashes: Vec<String> = flash_message(&code).map(str::to_string).into_iter().collect();
    (
        [(header::SET_COOKIE, session::clear_flash_cookie())],
        Html(pages::login_page(&flashes)),
    )
        .into_response()
}

async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let auth = &state.config.auth;

    if form.username == auth.username && form.password == auth.password {
        if let Some(old) = session::token_from_headers(&headers) {
            state.sessions.remove(&old);
        }
        let token = state.sessions.create(&form.username);
        tracing::info!("User {} logged in", form.username);
        return redirect_with_cookie(session::session_cookie(&token));
    }

    tracing::warn!("Failed login attempt for user {:?}", form.username);
    redirect_with_cookie(session::flash_cookie(LOGIN_FAILED_CODE))
}

async fn logout_handler(
    State(state): State<AppState>,
    Extension(CurrentUser(username)): Extension<CurrentUser>,
    headers: HeaderMap,
) -> Response {
    if let Some(token) = session::token_from_headers(&headers) {
        state.sessions.remove(&token);
    }
    tracing::info!("User {} logged out", username);
    redirect_with_cookie(session::clear_cookie())
}

async fn keepalive_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let alive = session::token_from_headers(&headers).is_some_and(|token| state.sessions.touch(&token));
    if alive {
        (StatusCode::OK, "Session is kept alive").into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "Not logged in").into_response()
    }
}

async fn collect_status(state: &AppState) -> anyhow::Result<host::StatusReport> {
    let paths = state.host_paths();
    let sample = Duration::from_millis(state.config.status.cpu_sample_ms);
    blocking(move || Ok(host::collect(&paths, sample))).await
}

async fn status_handler(
    State(state): State<AppState>,
    Extension(CurrentUser(username)): Extension<CurrentUser>,
) -> Response {
    match collect_status(&state).await {
        Ok(report) => Html(pages::status_page(&username, &report)).into_response(),
        Err(e) => internal_error("Failed to read system status", e),
    }
}

async fn api_status(State(state): State<AppState>) -> Response {
    match collect_status(&state).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => internal_error("Failed to read system status", e),
    }
}

async fn collect_network(state: &AppState) -> anyhow::Result<netinfo::NetReport> {
    let paths = state.host_paths();
    blocking(move || netinfo::collect(&paths.sys_root, &paths.proc_root)).await
}

async fn net_handler(
    State(state): State<AppState>,
    Extension(CurrentUser(username)): Extension<CurrentUser>,
) -> Response {
    match collect_network(&state).await {
        Ok(report) => Html(pages::net_page(&username, &report)).into_response(),
        Err(e) => internal_error("Failed to read network state", e),
    }
}

async fn api_network(State(state): State<AppState>) -> Response {
    match collect_network(&state).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => internal_error("Failed to read network state", e),
    }
}

async fn config_handler(Extension(CurrentUser(username)): Extension<CurrentUser>) -> Html<String> {
    Html(pages::config_page(&username))
}

async fn download_config(State(state): State<AppState>) -> Response {
    let paths = state.host_paths();
    let backup = blocking(move || {
        let version = host::version_info(&paths.os_release);
        Ok(upgrade::config_backup(
            &host::hostname(&paths),
            version.get("VERSION_ID"),
            chrono::Local::now(),
        ))
    })
    .await;
    match backup {
        Ok(text) => {
            let disposition = format!("attachment; filename={}", upgrade::BACKUP_FILE_NAME);
            (
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                    (header::CONTENT_DISPOSITION, disposition.as_str()),
                ],
                text,
            )
                .into_response()
        }
        Err(e) => internal_error("Failed to generate configuration file", e),
    }
}

async fn list_logs(State(state): State<AppState>) -> Response {
    let dir = state.config.paths.log_dir.clone();
    match blocking(move || logs::list_log_files(&dir)).await {
        Ok(files) => Json(files).into_response(),
        Err(e) => internal_error("Failed to list log files", e),
    }
}

/// Map a requested log name to a path, or the client error to answer with
async fn locate_log(state: &AppState, filename: &str) -> Result<std::path::PathBuf, Response> {
    let Some(path) = logs::resolve(&state.config.paths.log_dir, filename) else {
        return Err((StatusCode::BAD_REQUEST, "Invalid filename").into_response());
    };
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(path),
        _ => Err((StatusCode::NOT_FOUND, "Log file not found").into_response()),
    }
}

async fn get_log(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    let path = match locate_log(&state, &filename).await {
        Ok(path) => path,
        Err(resp) => return resp,
    };

    if logs::is_gzip(&filename) {
        return match blocking(move || logs::read_gzip(&path)).await {
            Ok(text) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
            Err(e) => internal_error("Failed to decompress log file", e),
        };
    }

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => return internal_error("Failed to open log file", e.into()),
    };
    let mime = mime_guess::from_path(&path).first_or_text_plain();
    (
        [(header::CONTENT_TYPE, mime.to_string())],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

async fn tail_log(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<TailQuery>,
) -> Response {
    let path = match locate_log(&state, &filename).await {
        Ok(path) => path,
        Err(resp) => return resp,
    };
    let lines = query.lines.unwrap_or(DEFAULT_TAIL_LINES);
    match blocking(move || logs::tail_lines(&path, lines)).await {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
        Err(e) => internal_error("Failed to read log file", e),
    }
}

async fn log_page_handler(
    State(state): State<AppState>,
    Extension(CurrentUser(username)): Extension<CurrentUser>,
    Query(query): Query<LogQuery>,
) -> Response {
    let dir = state.config.paths.log_dir.clone();
    let files = blocking(move || logs::list_log_files(&dir))
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to list log files: {:#}", e);
            Vec::new()
        });

    let Some(name) = query.file else {
        return Html(pages::log_page(&username, &files, None)).into_response();
    };
    let path = match locate_log(&state, &name).await {
        Ok(path) => path,
        Err(resp) => return resp,
    };
    match blocking(move || logs::read_for_display(&path)).await {
        Ok(view) => Html(pages::log_page(&username, &files, Some((name.as_str(), &view)))).into_response(),
        Err(e) => internal_error("Failed to read log file", e),
    }
}

async fn upgrade_handler(
    State(state): State<AppState>,
    Extension(CurrentUser(username)): Extension<CurrentUser>,
) -> Response {
    let os_release = state.config.paths.os_release.clone();
    let info = match blocking(move || Ok(host::version_info(&os_release))).await {
        Ok(info) => info,
        Err(e) => return internal_error("Failed to read version information", e),
    };
    let firmware = upgrade::firmware_info(state.config.upgrade.status_command.as_deref()).await;
    Html(pages::upgrade_page(&username, &info, &firmware)).into_response()
}

/// Answer a failed save with the multipart rejection status when the body was
/// at fault, e.g. 413 past the upload limit
fn upload_failed(err: anyhow::Error) -> Response {
    match err.downcast_ref::<MultipartError>() {
        Some(rejection) => {
            tracing::warn!("Upload rejected: {:#}", err);
            (rejection.status(), rejection.body_text()).into_response()
        }
        None => internal_error("Failed to save upload", err),
    }
}

async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    if state.upgrade.snapshot().status == Phase::Installing {
        return (StatusCode::CONFLICT, "Upgrade in progress").into_response();
    }
    let upload_path = state.config.upgrade.upload_path.clone();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return (StatusCode::BAD_REQUEST, "No file found").into_response(),
            Err(e) => return (e.status(), e.body_text()).into_response(),
        };
        if field.name() != Some("file") {
            continue;
        }

        let client_name = field.file_name().unwrap_or("").to_string();
        let bytes = match upgrade::save_upload(field, &upload_path).await {
            Ok(bytes) => bytes,
            Err(e) => return upload_failed(e),
        };
        tracing::info!(
            "Received upload {:?} ({} bytes) at {}",
            client_name,
            bytes,
            upload_path.display()
        );
        state.upgrade.reset_uploaded(bytes);

        if let Some(installer) = &state.config.upgrade.installer {
            upgrade::spawn_installer(state.upgrade.clone(), installer.clone(), upload_path);
        }
        return Json(serde_json::json!({ "next": "progress" })).into_response();
    }
}

async fn progress_handler(Extension(CurrentUser(username)): Extension<CurrentUser>) -> Html<String> {
    Html(pages::progress_page(&username))
}

async fn upgrade_status(State(state): State<AppState>) -> Json<upgrade::UpgradeStatus> {
    Json(state.upgrade.snapshot())
}

async fn reboot_handler(
    State(state): State<AppState>,
    Extension(CurrentUser(username)): Extension<CurrentUser>,
) -> Json<serde_json::Value> {
    tracing::info!("Reboot requested by user {}", username);
    upgrade::spawn_reboot(state.config.upgrade.reboot_command.clone(), upgrade::REBOOT_DELAY);
    Json(serde_json::json!({
        "status": "rebooting",
        "message": "System is rebooting...",
    }))
}
