#![forbid(unsafe_code)]

//! Axum backend for the iTube web client.
//!
//! The frontend is a static page hosting an embedded YouTube player. This
//! binary serves those files, resolves pasted URLs into embeddable player
//! links, and manages the per-user playlist stored in local SQLite. All
//! playlist storage traffic is funneled through the single worker owned by
//! `PlaylistService`, so request handlers never block on the database.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use itube_tools::config::{RuntimeOverrides, resolve_runtime_paths};
use itube_tools::playlist::{
    AddOutcome, PlaylistError, PlaylistItem, PlaylistService, PlaylistStore,
};
use itube_tools::session::SessionStore;
use itube_tools::watch;
use mime_guess::MimeGuess;
use nix::unistd::Uid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;

// SQLite database file relative to the data root. The session file lives next
// to it; see `session::SESSION_FILE`.
const PLAYLIST_DB_FILE: &str = "playlist.db";

#[derive(Debug, Clone)]
struct BackendArgs {
    data_root: PathBuf,
    www_root: PathBuf,
    itube_port: u16,
    listen_host: IpAddr,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut data_root_override: Option<PathBuf> = None;
        let mut www_root_override: Option<PathBuf> = None;
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<IpAddr> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--data-root=") {
                data_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--www-root=") {
                www_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(parse_host_arg(value)?);
                continue;
            }

            match arg.as_str() {
                "--data-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--data-root requires a value"))?;
                    data_root_override = Some(PathBuf::from(value));
                }
                "--www-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--www-root requires a value"))?;
                    www_root_override = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(parse_host_arg(&value)?);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let runtime_paths = resolve_runtime_paths(RuntimeOverrides {
            data_root: data_root_override,
            www_root: www_root_override,
            itube_port: port_override,
            itube_host: host_override.map(|host| host.to_string()),
            ..RuntimeOverrides::default()
        })?;
        let listen_host = parse_host_arg(&runtime_paths.itube_host)?;

        Ok(Self {
            data_root: runtime_paths.data_root,
            www_root: runtime_paths.www_root,
            itube_port: runtime_paths.itube_port,
            listen_host,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/ITUBE_HOST")
}

/// The backend writes the playlist DB and session file under the data root;
/// a root-owned run would leave files later unprivileged runs cannot touch.
fn refuse_root(uid: Uid) -> Result<()> {
    if uid.is_root() {
        bail!("backend must not be run as root; use a regular user account");
    }
    Ok(())
}

/// Shared state injected into every Axum handler.
///
/// * `playlist` is the handle to the single storage worker.
/// * `session` resolves the signed-in user per request; the resolved id is
///   passed explicitly into every playlist call.
/// * `cache` keeps the last listing per user so repeated playlist-screen
///   loads skip the worker round trip.
#[derive(Clone)]
struct AppState {
    playlist: PlaylistService,
    session: Arc<SessionStore>,
    cache: Arc<PlaylistCache>,
    www_root: Arc<PathBuf>,
}

/// Per-user cache of playlist listings, dropped whenever that user's
/// playlist mutates.
struct PlaylistCache {
    items: RwLock<HashMap<i64, Vec<PlaylistItem>>>,
}

impl PlaylistCache {
    fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, user_id: i64) -> Option<Vec<PlaylistItem>> {
        self.items.read().get(&user_id).cloned()
    }

    fn put(&self, user_id: i64, items: Vec<PlaylistItem>) {
        self.items.write().insert(user_id, items);
    }

    fn invalidate(&self, user_id: i64) {
        self.items.write().remove(&user_id);
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }
}

impl From<PlaylistError> for ApiError {
    fn from(err: PlaylistError) -> Self {
        match err {
            PlaylistError::EmptyUrl => Self::unprocessable(err.to_string()),
            PlaylistError::Storage(_) | PlaylistError::WorkerGone => {
                Self::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let BackendArgs {
        data_root,
        www_root,
        itube_port,
        listen_host,
    } = BackendArgs::parse()?;

    refuse_root(Uid::current())?;

    let store = PlaylistStore::open(&data_root.join(PLAYLIST_DB_FILE))
        .await
        .context("initializing playlist store")?;
    let session = SessionStore::load(&data_root);

    let state = AppState {
        playlist: PlaylistService::spawn(store),
        session: Arc::new(session),
        cache: Arc::new(PlaylistCache::new()),
        www_root: Arc::new(www_root),
    };

    let app = Router::new()
        .route("/api/session", get(get_session))
        .route("/api/watch", post(resolve_watch))
        .route(
            "/api/playlist",
            get(list_playlist)
                .post(save_to_playlist)
                .delete(remove_from_playlist),
        )
        .fallback(static_fallback)
        .with_state(state);

    let addr = SocketAddr::new(listen_host, itube_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("iTube backend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running backend")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown is affected if this fails; the process still
    // terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    user_id: Option<i64>,
}

async fn get_session(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(SessionResponse {
        user_id: state.session.current_user(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchRequest {
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    video_id: String,
    embed_url: String,
}

/// Resolves a pasted URL into the player link the frontend loads into its
/// embedded web view. An id-less match (bare `youtu.be/`) counts as invalid.
async fn resolve_watch(Json(request): Json<WatchRequest>) -> ApiResult<Json<WatchResponse>> {
    let video_id = watch::extract_video_id(&request.url)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::unprocessable("invalid YouTube URL"))?;
    let embed_url = watch::embed_url(&video_id);
    Ok(Json(WatchResponse {
        video_id,
        embed_url,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistRequest {
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveResponse {
    status: AddOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveResponse {
    removed: bool,
}

fn session_user(state: &AppState) -> ApiResult<i64> {
    state
        .session
        .current_user()
        .ok_or_else(|| ApiError::unauthorized("not logged in"))
}

async fn save_to_playlist(
    State(state): State<AppState>,
    Json(request): Json<PlaylistRequest>,
) -> ApiResult<Json<SaveResponse>> {
    let user_id = session_user(&state)?;
    let status = state.playlist.add_to_playlist(user_id, &request.url).await?;
    if status == AddOutcome::Added {
        state.cache.invalidate(user_id);
    }
    Ok(Json(SaveResponse { status }))
}

async fn list_playlist(State(state): State<AppState>) -> ApiResult<Json<Vec<PlaylistItem>>> {
    let user_id = session_user(&state)?;
    if let Some(items) = state.cache.get(user_id) {
        return Ok(Json(items));
    }

    let items = state.playlist.list_items(user_id).await?;
    state.cache.put(user_id, items.clone());
    Ok(Json(items))
}

async fn remove_from_playlist(
    State(state): State<AppState>,
    Json(request): Json<PlaylistRequest>,
) -> ApiResult<Json<RemoveResponse>> {
    let user_id = session_user(&state)?;
    let removed = state.playlist.remove_item(user_id, &request.url).await?;
    if removed {
        state.cache.invalidate(user_id);
    }
    Ok(Json(RemoveResponse { removed }))
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_static_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Serves a frontend file. Unknown extensionless paths fall back to
/// `index.html` so the frontend can route `/watch?video_url=...` style
/// links client-side.
async fn serve_static_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_static_path(root, request_path)
        .ok_or_else(|| ApiError::not_found("file not found"))?;

    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_file() => stream_static_file(target).await,
        _ if should_fallback_to_index(request_path) => {
            stream_static_file(root.join("index.html")).await
        }
        _ => Err(ApiError::not_found("file not found")),
    }
}

/// Maps a request path onto the www root, rejecting anything that is not a
/// plain relative path (`..`, absolute components, prefixes).
fn resolve_static_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Some(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    let plain = candidate
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    plain.then(|| root.join(candidate))
}

fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_static_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mime = MimeGuess::from_path(&path).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        mime.as_ref()
            .parse()
            .map_err(|_| ApiError::internal("invalid content type"))?,
    );

    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
}
