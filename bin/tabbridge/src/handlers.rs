//! HTTP surface: routes, middleware and handlers.
//!
//! Handlers translate between JSON requests and bridge operations. Every
//! non-2xx body is `{"error": "<message>"}`; the status comes from the
//! error taxonomy in tabbridge-core. CDP-touching work runs through
//! [`scoped`], which gives each request its own cancellation token.

use axum::{
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use tabbridge_browser::{
    actions::{self, ActionRequest},
    bridge::{Bridge, RefCache, TabSession},
    diff::diff_snapshot,
    navigate,
    snapshot::{build_snapshot, format_snapshot_text, parse_ax_nodes},
};
use tabbridge_core::{Error, Result, MAX_BODY_SIZE};

const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);
const MAX_NAV_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_TITLE_WAIT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tabs", get(handle_tabs))
        .route("/snapshot", get(handle_snapshot))
        .route("/screenshot", get(handle_screenshot))
        .route("/text", get(handle_text))
        .route("/navigate", post(handle_navigate))
        .route("/action", post(handle_action))
        .route("/evaluate", post(handle_evaluate))
        .route("/tab", post(handle_tab))
        .route("/tab/lock", post(handle_tab_lock))
        .route("/tab/unlock", post(handle_tab_unlock))
        .route("/cookies", get(handle_get_cookies).post(handle_set_cookies))
        .route("/shutdown", post(handle_shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

// ── Middleware ──────────────────────────────────────────────

fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let token = &state.bridge.config().token;
    if token.is_empty() {
        return next.run(req).await;
    }

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| secure_eq(t, token))
        .unwrap_or(false);

    if authorized {
        next.run(req).await
    } else {
        error_response(&Error::Unauthorized)
    }
}

// ── Response helpers ────────────────────────────────────────

fn error_response(err: &Error) -> Response {
    let code = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(json!({"error": err.to_string()}))).into_response()
}

fn respond(result: Result<Value>) -> Response {
    match result {
        Ok(v) => Json(v).into_response(),
        Err(e) => error_response(&e),
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::bad_input(format!("decode: {}", e)))
}

/// Run CDP-touching work on its own task behind a request-scoped
/// cancellation token. The token is a child of `parent`, so tab close and
/// shutdown cascade into it; it additionally fires when `limit` elapses or
/// when the returned future is dropped before completion (client gone,
/// server tearing down). The spawned task observes the token at its next
/// CDP suspension point and aborts cooperatively, cleaning up the
/// connection's pending state, rather than being silently abandoned.
async fn scoped<T, F, Fut>(parent: &CancellationToken, limit: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
{
    let cancel = parent.child_token();
    let guard = cancel.clone().drop_guard();
    let mut task = tokio::spawn(f(cancel.clone()));

    let result = tokio::select! {
        res = &mut task => match res {
            Ok(r) => r,
            Err(e) => Err(Error::cdp(format!("request task: {}", e))),
        },
        _ = tokio::time::sleep(limit) => {
            cancel.cancel();
            Err(Error::cdp(format!("timed out after {:?}", limit)))
        }
    };
    drop(guard.disarm());
    result
}

// ── GET /health ─────────────────────────────────────────────

async fn handle_health(State(state): State<AppState>) -> Response {
    let cdp = state.bridge.config().cdp_url.clone();
    match state.bridge.list_targets().await {
        Ok(targets) => Json(json!({"status": "ok", "tabs": targets.len(), "cdp": cdp})),
        Err(e) => Json(json!({"status": "disconnected", "error": e.to_string(), "cdp": cdp})),
    }
    .into_response()
}

// ── GET /tabs ───────────────────────────────────────────────

async fn handle_tabs(State(state): State<AppState>) -> Response {
    let targets = match state.bridge.list_targets().await {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    let tabs: Vec<Value> = targets
        .iter()
        .map(|t| {
            let mut entry = json!({
                "id": t.target_id,
                "url": t.url,
                "title": t.title,
                "type": t.kind,
            });
            if let Some(lock) = state.bridge.locks().get(&t.target_id) {
                entry["owner"] = json!(lock.owner);
                entry["lockedUntil"] = json!(lock.expires_at_rfc3339());
            }
            entry
        })
        .collect();

    Json(json!({"tabs": tabs})).into_response()
}

// ── GET /snapshot ───────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SnapshotQuery {
    tab_id: String,
    filter: String,
    depth: String,
    diff: String,
    format: String,
}

async fn handle_snapshot(State(state): State<AppState>, Query(q): Query<SnapshotQuery>) -> Response {
    let bridge = Arc::clone(&state.bridge);
    let (session, tab_id) = match bridge.resolve_tab(&q.tab_id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let timeout = bridge.config().action_timeout;
    let parent = session.cancel.clone();
    match scoped(&parent, timeout, move |cancel| {
        snapshot_body(bridge, session, tab_id, q, cancel)
    })
    .await
    {
        Ok(resp) => resp,
        Err(e) => error_response(&e),
    }
}

async fn snapshot_body(
    bridge: Arc<Bridge>,
    session: Arc<TabSession>,
    tab_id: String,
    q: SnapshotQuery,
    cancel: CancellationToken,
) -> Result<Response> {
    let max_depth = q.depth.parse::<usize>().ok();
    let interactive = q.filter == "interactive";

    let conn = bridge.conn()?;
    let raw = conn
        .execute(
            Some(&session.session_id),
            "Accessibility.getFullAXTree",
            json!({}),
            &cancel,
        )
        .await
        .map_err(|e| Error::cdp(format!("a11y tree: {}", e)))?;

    let nodes = parse_ax_nodes(&raw)?;
    let (flat, refs) = build_snapshot(&nodes, interactive, max_depth);

    // Diff against the previous cache before it is overwritten.
    let prev = if q.diff == "true" {
        bridge.ref_cache(&tab_id).await
    } else {
        None
    };

    bridge
        .set_ref_cache(&tab_id, RefCache { refs, nodes: flat.clone() })
        .await;

    let url = navigate::page_url(conn, &session.session_id, &cancel).await;
    let title = navigate::page_title(conn, &session.session_id, &cancel).await;

    if let Some(prev) = prev {
        let d = diff_snapshot(&prev.nodes, &flat);
        let counts = json!({
            "added": d.added.len(),
            "changed": d.changed.len(),
            "removed": d.removed.len(),
            "total": flat.len(),
        });
        return Ok(Json(json!({
            "url": url,
            "title": title,
            "diff": true,
            "added": d.added,
            "changed": d.changed,
            "removed": d.removed,
            "counts": counts,
        }))
        .into_response());
    }

    if q.format == "text" {
        let body = format!(
            "# {}\n# {}\n# {} nodes\n\n{}",
            title,
            url,
            flat.len(),
            format_snapshot_text(&flat)
        );
        return Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response());
    }

    Ok(Json(json!({
        "url": url,
        "title": title,
        "nodes": flat,
        "count": flat.len(),
    }))
    .into_response())
}

// ── GET /screenshot ─────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScreenshotQuery {
    tab_id: String,
    quality: String,
    raw: String,
    output: String,
}

async fn handle_screenshot(
    State(state): State<AppState>,
    Query(q): Query<ScreenshotQuery>,
) -> Response {
    let bridge = Arc::clone(&state.bridge);
    let (session, _) = match bridge.resolve_tab(&q.tab_id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let quality: u32 = q.quality.parse().unwrap_or(80);
    let timeout = bridge.config().action_timeout;
    let parent = session.cancel.clone();

    let data = match scoped(&parent, timeout, move |cancel| async move {
        let conn = bridge.conn()?;
        let result = conn
            .execute(
                Some(&session.session_id),
                "Page.captureScreenshot",
                json!({"format": "jpeg", "quality": quality}),
                &cancel,
            )
            .await
            .map_err(|e| Error::cdp(format!("screenshot: {}", e)))?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::cdp("screenshot: no data returned"))
    })
    .await
    {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };

    if q.output == "file" {
        return respond(write_screenshot(&state.bridge, &data));
    }

    if q.raw == "true" {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(&data) {
            Ok(b) => b,
            Err(e) => return error_response(&Error::cdp(format!("decode screenshot: {}", e))),
        };
        return ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response();
    }

    Json(json!({"format": "jpeg", "base64": data})).into_response()
}

fn write_screenshot(bridge: &Bridge, data: &str) -> Result<Value> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::cdp(format!("decode screenshot: {}", e)))?;
    let dir = bridge.config().screenshots_dir();
    std::fs::create_dir_all(&dir)?;

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    let path = dir.join(format!("screenshot-{}.jpg", timestamp));
    std::fs::write(&path, &bytes)?;

    Ok(json!({
        "path": path.display().to_string(),
        "size": bytes.len(),
        "format": "jpeg",
        "timestamp": timestamp,
    }))
}

// ── GET /text ───────────────────────────────────────────────

/// Main-content extraction for the default mode; pages without a landmark
/// fall back to the whole body.
const EXTRACT_TEXT_JS: &str = r#"(() => {
    const main = document.querySelector('article, main, [role="main"]') || document.body;
    return main ? main.innerText : '';
})()"#;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TextQuery {
    tab_id: String,
    mode: String,
}

async fn handle_text(State(state): State<AppState>, Query(q): Query<TextQuery>) -> Response {
    let bridge = Arc::clone(&state.bridge);
    let (session, _) = match bridge.resolve_tab(&q.tab_id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let timeout = bridge.config().action_timeout;
    let parent = session.cancel.clone();
    let raw_mode = q.mode == "raw";

    respond(
        scoped(&parent, timeout, move |cancel| async move {
            let conn = bridge.conn()?;
            let expr = if raw_mode {
                "document.body.innerText"
            } else {
                EXTRACT_TEXT_JS
            };
            let text = conn
                .eval_in(&session.session_id, expr, &cancel)
                .await
                .map_err(|e| Error::cdp(format!("text extract: {}", e)))?;

            let url = navigate::page_url(conn, &session.session_id, &cancel).await;
            let title = navigate::page_title(conn, &session.session_id, &cancel).await;
            Ok(json!({
                "url": url,
                "title": title,
                "text": text.as_str().unwrap_or_default(),
            }))
        })
        .await,
    )
}

// ── POST /navigate ──────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NavigateRequest {
    tab_id: String,
    url: String,
    new_tab: bool,
    wait_title: f64,
    timeout: f64,
    block_images: Option<bool>,
    block_media: Option<bool>,
}

async fn handle_navigate(State(state): State<AppState>, body: String) -> Response {
    let req: NavigateRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    if req.url.is_empty() {
        return error_response(&Error::bad_input("url required"));
    }

    let (default_nav, global_images, global_media) = {
        let config = state.bridge.config();
        (config.navigate_timeout, config.block_images, config.block_media)
    };

    let title_wait = Duration::from_secs_f64(req.wait_title.clamp(0.0, MAX_TITLE_WAIT.as_secs_f64()));
    let nav_timeout = if req.timeout > 0.0 {
        Duration::from_secs_f64(req.timeout.min(MAX_NAV_TIMEOUT.as_secs_f64()))
    } else {
        default_nav
    };

    // Per-request blocking overrides the global config; an explicit
    // blockImages=false clears any active blocking.
    let block_patterns: Option<&'static [&'static str]> = if req.block_media == Some(true) {
        Some(navigate::MEDIA_BLOCK_PATTERNS)
    } else if req.block_images == Some(true) {
        Some(navigate::IMAGE_BLOCK_PATTERNS)
    } else if req.block_images == Some(false) {
        Some(&[])
    } else if global_media {
        Some(navigate::MEDIA_BLOCK_PATTERNS)
    } else if global_images {
        Some(navigate::IMAGE_BLOCK_PATTERNS)
    } else {
        None
    };

    if req.new_tab {
        let (tab_id, session) = match state.bridge.create_tab(&req.url).await {
            Ok(pair) => pair,
            Err(e) => return error_response(&Error::cdp(format!("new tab: {}", e))),
        };
        let bridge = Arc::clone(&state.bridge);
        let parent = session.cancel.clone();
        return respond(
            scoped(&parent, nav_timeout + title_wait, move |cancel| async move {
                let conn = bridge.conn()?;
                if let Some(patterns) = block_patterns {
                    let _ =
                        navigate::set_blocked_urls(conn, &session.session_id, patterns, &cancel).await;
                }
                let url = navigate::page_url(conn, &session.session_id, &cancel).await;
                let title =
                    navigate::wait_for_title(conn, &session.session_id, title_wait, &cancel).await;
                Ok(json!({"tabId": tab_id, "url": url, "title": title}))
            })
            .await,
        );
    }

    let (session, resolved_id) = match state.bridge.resolve_tab(&req.tab_id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let bridge = Arc::clone(&state.bridge);
    let parent = session.cancel.clone();
    let url = req.url;
    respond(
        scoped(&parent, nav_timeout + title_wait, move |cancel| async move {
            let conn = bridge.conn()?;
            if let Some(patterns) = block_patterns {
                let _ = navigate::set_blocked_urls(conn, &session.session_id, patterns, &cancel).await;
            }

            navigate::navigate(conn, &session.session_id, &url, nav_timeout, &cancel)
                .await
                .map_err(|e| Error::cdp(format!("navigate: {}", e)))?;

            // The old snapshot's refs point into a dead document.
            bridge.delete_ref_cache(&resolved_id).await;

            let current = navigate::page_url(conn, &session.session_id, &cancel).await;
            let title =
                navigate::wait_for_title(conn, &session.session_id, title_wait, &cancel).await;
            Ok(json!({"url": current, "title": title}))
        })
        .await,
    )
}

// ── POST /action ────────────────────────────────────────────

async fn handle_action(State(state): State<AppState>, body: String) -> Response {
    let req: ActionRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    let bridge = Arc::clone(&state.bridge);
    // Resolve up front so the request token parents under the tab session;
    // the dispatcher's own resolve hits the registry fast path.
    let (session, _) = match bridge.resolve_tab(&req.tab_id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let timeout = bridge.config().action_timeout;
    let parent = session.cancel.clone();
    respond(
        scoped(&parent, timeout, move |cancel| async move {
            actions::dispatch(&bridge, &req, &cancel).await
        })
        .await,
    )
}

// ── POST /evaluate ──────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EvaluateRequest {
    tab_id: String,
    expression: String,
}

async fn handle_evaluate(State(state): State<AppState>, body: String) -> Response {
    let req: EvaluateRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    if req.expression.is_empty() {
        return error_response(&Error::bad_input("expression required"));
    }

    let bridge = Arc::clone(&state.bridge);
    let (session, _) = match bridge.resolve_tab(&req.tab_id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let timeout = bridge.config().action_timeout;
    let parent = session.cancel.clone();
    let expression = req.expression;
    respond(
        scoped(&parent, timeout, move |cancel| async move {
            let conn = bridge.conn()?;
            let result = conn
                .eval_in(&session.session_id, &expression, &cancel)
                .await
                .map_err(|e| Error::cdp(format!("evaluate: {}", e)))?;
            Ok(json!({"result": result}))
        })
        .await,
    )
}

// ── POST /tab ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TabRequest {
    action: String,
    tab_id: String,
    url: String,
}

async fn handle_tab(State(state): State<AppState>, body: String) -> Response {
    let req: TabRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    let bridge = &state.bridge;

    match req.action.as_str() {
        "new" => respond(async {
            let (tab_id, session) = bridge.create_tab(&req.url).await?;
            let conn = bridge.conn()?;
            let url = navigate::page_url(conn, &session.session_id, &session.cancel).await;
            let title = navigate::page_title(conn, &session.session_id, &session.cancel).await;
            Ok(json!({"tabId": tab_id, "url": url, "title": title}))
        }
        .await),

        "close" => {
            if req.tab_id.is_empty() {
                return error_response(&Error::bad_input("tabId required"));
            }
            respond(async {
                bridge.close_tab(&req.tab_id).await?;
                Ok(json!({"closed": true}))
            }
            .await)
        }

        _ => error_response(&Error::bad_input("action must be 'new' or 'close'")),
    }
}

// ── POST /tab/lock, /tab/unlock ─────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LockRequest {
    tab_id: String,
    owner: String,
    timeout_sec: u64,
}

async fn handle_tab_lock(State(state): State<AppState>, body: String) -> Response {
    let req: LockRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    if req.tab_id.is_empty() || req.owner.is_empty() {
        return error_response(&Error::bad_input("tabId and owner required"));
    }

    let ttl = if req.timeout_sec > 0 {
        Duration::from_secs(req.timeout_sec)
    } else {
        DEFAULT_LOCK_TTL
    };

    match state.bridge.locks().lock(&req.tab_id, &req.owner, ttl) {
        Ok(entry) => Json(json!({
            "locked": true,
            "owner": entry.owner,
            "expiresAt": entry.expires_at_rfc3339(),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_tab_unlock(State(state): State<AppState>, body: String) -> Response {
    let req: LockRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    if req.tab_id.is_empty() || req.owner.is_empty() {
        return error_response(&Error::bad_input("tabId and owner required"));
    }

    match state.bridge.locks().unlock(&req.tab_id, &req.owner) {
        Ok(()) => Json(json!({"unlocked": true})).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── GET /cookies, POST /cookies ─────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CookiesQuery {
    tab_id: String,
}

async fn handle_get_cookies(
    State(state): State<AppState>,
    Query(q): Query<CookiesQuery>,
) -> Response {
    let bridge = Arc::clone(&state.bridge);
    let (session, _) = match bridge.resolve_tab(&q.tab_id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let timeout = bridge.config().action_timeout;
    let parent = session.cancel.clone();
    respond(
        scoped(&parent, timeout, move |cancel| async move {
            let conn = bridge.conn()?;
            let result = conn
                .execute(Some(&session.session_id), "Network.getCookies", json!({}), &cancel)
                .await
                .map_err(|e| Error::cdp(format!("get cookies: {}", e)))?;
            Ok(json!({"cookies": result.get("cookies").cloned().unwrap_or_else(|| json!([]))}))
        })
        .await,
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SetCookiesRequest {
    tab_id: String,
    cookies: Vec<Value>,
}

async fn handle_set_cookies(State(state): State<AppState>, body: String) -> Response {
    let req: SetCookiesRequest = match decode_body(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    if req.cookies.is_empty() {
        return error_response(&Error::bad_input("cookies required"));
    }
    for (i, cookie) in req.cookies.iter().enumerate() {
        let has_scope = cookie.get("url").and_then(|v| v.as_str()).is_some()
            || cookie.get("domain").and_then(|v| v.as_str()).is_some();
        if !has_scope {
            return error_response(&Error::bad_input(format!(
                "cookie {} requires url or domain",
                i
            )));
        }
    }

    let bridge = Arc::clone(&state.bridge);
    let (session, _) = match bridge.resolve_tab(&req.tab_id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(&e),
    };

    let timeout = bridge.config().action_timeout;
    let parent = session.cancel.clone();
    let cookies = req.cookies;
    respond(
        scoped(&parent, timeout, move |cancel| async move {
            let conn = bridge.conn()?;
            conn.execute(
                Some(&session.session_id),
                "Network.setCookies",
                json!({"cookies": cookies}),
                &cancel,
            )
            .await
            .map_err(|e| Error::cdp(format!("set cookies: {}", e)))?;
            Ok(json!({"set": cookies.len()}))
        })
        .await,
    )
}

// ── POST /shutdown ──────────────────────────────────────────

async fn handle_shutdown(State(state): State<AppState>) -> Response {
    info!("shutdown requested via API");
    let bridge = Arc::clone(&state.bridge);
    // Let the response flush before the listener goes away.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        bridge.shutdown().await;
    });
    Json(json!({"status": "shutting down"})).into_response()
}

// ── Tests ───────────────────────────────────────────────────
