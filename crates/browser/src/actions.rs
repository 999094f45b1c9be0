//! Action dispatch: resolve a target, touch it over CDP, return a small
//! result object.
//!
//! Kinds live in a static registry keyed by name with a uniform handler
//! signature; adding a kind is an addition, the dispatcher's type never
//! changes. Targets resolve in the order nodeId > selector > ref, with refs
//! looked up in the tab's last snapshot; stale refs fail fast instead of
//! being re-resolved.

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use tabbridge_core::{Error, Result};

use crate::bridge::{Bridge, TabSession};

/// Settle time after a click that is expected to trigger navigation.
const WAIT_NAV_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionRequest {
    pub tab_id: String,
    pub kind: String,
    #[serde(rename = "ref")]
    pub ref_id: String,
    pub selector: String,
    pub node_id: i64,
    pub text: String,
    pub key: String,
    pub value: String,
    pub scroll_x: i64,
    pub scroll_y: i64,
    pub wait_nav: bool,
}

pub struct ActionCtx<'a> {
    pub bridge: &'a Bridge,
    pub session: &'a TabSession,
    pub tab_id: &'a str,
    /// Request-scoped token: a child of the session token that also fires
    /// on the per-request timeout and on client disconnect.
    pub cancel: &'a CancellationToken,
}

type Handler =
    for<'a> fn(&'a ActionCtx<'a>, &'a ActionRequest) -> BoxFuture<'a, Result<Value>>;

static REGISTRY: Lazy<HashMap<&'static str, Handler>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, Handler> = HashMap::new();
    m.insert("click", |ctx, req| Box::pin(act_click(ctx, req)));
    m.insert("type", |ctx, req| Box::pin(act_type(ctx, req)));
    m.insert("fill", |ctx, req| Box::pin(act_fill(ctx, req)));
    m.insert("press", |ctx, req| Box::pin(act_press(ctx, req)));
    m.insert("focus", |ctx, req| Box::pin(act_focus(ctx, req)));
    m.insert("hover", |ctx, req| Box::pin(act_hover(ctx, req)));
    m.insert("select", |ctx, req| Box::pin(act_select(ctx, req)));
    m.insert("scroll", |ctx, req| Box::pin(act_scroll(ctx, req)));
    m
});

/// Registered action kinds, for diagnostics.
pub fn known_kinds() -> Vec<&'static str> {
    let mut kinds: Vec<_> = REGISTRY.keys().copied().collect();
    kinds.sort_unstable();
    kinds
}

/// Run one action request: resolve the tab, look up the kind, dispatch.
/// Every CDP call made on behalf of the request waits on `cancel`.
pub async fn dispatch(
    bridge: &Bridge,
    req: &ActionRequest,
    cancel: &CancellationToken,
) -> Result<Value> {
    let (session, tab_id) = bridge.resolve_tab(&req.tab_id).await?;
    if req.kind.is_empty() {
        return Err(Error::bad_input("kind required"));
    }
    let handler = REGISTRY
        .get(req.kind.as_str())
        .ok_or_else(|| Error::bad_input(format!("unknown action: {}", req.kind)))?;
    let ctx = ActionCtx {
        bridge,
        session: &session,
        tab_id: &tab_id,
        cancel,
    };
    handler(&ctx, req).await
}

// ── Target resolution ─────────────────────────────────────────

enum Target {
    Node(i64),
    Selector(String),
}

fn has_target(req: &ActionRequest) -> bool {
    req.node_id > 0 || !req.selector.is_empty() || !req.ref_id.is_empty()
}

async fn resolve_target(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Target> {
    if req.node_id > 0 {
        return Ok(Target::Node(req.node_id));
    }
    if !req.selector.is_empty() {
        return Ok(Target::Selector(req.selector.clone()));
    }
    if !req.ref_id.is_empty() {
        let cache = ctx.bridge.ref_cache(ctx.tab_id).await.ok_or_else(|| {
            Error::not_found(format!(
                "no snapshot cache for tab {} — take a /snapshot first",
                ctx.tab_id
            ))
        })?;
        let node_id = cache.refs.get(&req.ref_id).copied().ok_or_else(|| {
            Error::not_found(format!(
                "ref {} not found in last snapshot — take a /snapshot first",
                req.ref_id
            ))
        })?;
        return Ok(Target::Node(node_id));
    }
    Err(Error::bad_input("need selector, ref, or nodeId"))
}

/// Resolve a target to a Runtime object id. Object ids are scoped to the
/// page's execution context and must not be cached across navigations.
async fn object_id(ctx: &ActionCtx<'_>, target: &Target) -> Result<String> {
    let conn = ctx.bridge.conn()?;
    let sid = ctx.session.session_id.as_str();
    let cancel = ctx.cancel;

    match target {
        Target::Node(node_id) => {
            let result = conn
                .execute(
                    Some(sid),
                    "DOM.resolveNode",
                    json!({"backendNodeId": node_id}),
                    cancel,
                )
                .await?;
            result
                .get("object")
                .and_then(|o| o.get("objectId"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| Error::cdp(format!("no objectId for node {}", node_id)))
        }
        Target::Selector(selector) => {
            let expr = format!("document.querySelector({})", Value::String(selector.clone()));
            let result = conn
                .execute(
                    Some(sid),
                    "Runtime.evaluate",
                    json!({"expression": expr}),
                    cancel,
                )
                .await?;
            let obj = result.get("result").cloned().unwrap_or(Value::Null);
            if obj.get("subtype").and_then(|v| v.as_str()) == Some("null") {
                return Err(Error::cdp(format!("no element matches selector {}", selector)));
            }
            obj.get("objectId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| Error::cdp(format!("no element matches selector {}", selector)))
        }
    }
}

/// `Runtime.callFunctionOn` against a resolved object.
async fn call_on(
    ctx: &ActionCtx<'_>,
    object_id: &str,
    declaration: &str,
    args: Vec<Value>,
) -> Result<Value> {
    let conn = ctx.bridge.conn()?;
    let arguments: Vec<Value> = args.into_iter().map(|v| json!({"value": v})).collect();
    conn.execute(
        Some(&ctx.session.session_id),
        "Runtime.callFunctionOn",
        json!({
            "objectId": object_id,
            "functionDeclaration": declaration,
            "arguments": arguments,
            "returnByValue": true,
        }),
        ctx.cancel,
    )
    .await
}

// ── Keyboard ──────────────────────────────────────────────────

/// Key event parameters for the named keys agents actually press.
fn key_params(key: &str) -> (Option<i64>, Option<&'static str>) {
    match key {
        "Enter" => (Some(13), Some("\r")),
        "Tab" => (Some(9), None),
        "Escape" => (Some(27), None),
        "Backspace" => (Some(8), None),
        "Delete" => (Some(46), None),
        "ArrowLeft" => (Some(37), None),
        "ArrowUp" => (Some(38), None),
        "ArrowRight" => (Some(39), None),
        "ArrowDown" => (Some(40), None),
        "Home" => (Some(36), None),
        "End" => (Some(35), None),
        "PageUp" => (Some(33), None),
        "PageDown" => (Some(34), None),
        _ => (None, None),
    }
}

async fn send_key(ctx: &ActionCtx<'_>, key: &str) -> Result<()> {
    let conn = ctx.bridge.conn()?;
    let sid = ctx.session.session_id.as_str();
    let cancel = ctx.cancel;

    let (vk, text) = key_params(key);
    let mut down = json!({"type": "keyDown", "key": key});
    if let Some(vk) = vk {
        down["windowsVirtualKeyCode"] = json!(vk);
        down["code"] = json!(key);
    }
    if let Some(text) = text {
        down["text"] = json!(text);
    } else if key.chars().count() == 1 {
        down["text"] = json!(key);
    }
    conn.execute(Some(sid), "Input.dispatchKeyEvent", down, cancel).await?;

    let mut up = json!({"type": "keyUp", "key": key});
    if let Some(vk) = vk {
        up["windowsVirtualKeyCode"] = json!(vk);
        up["code"] = json!(key);
    }
    conn.execute(Some(sid), "Input.dispatchKeyEvent", up, cancel).await?;
    Ok(())
}

// ── Kinds ─────────────────────────────────────────────────────

async fn act_click(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Value> {
    let target = resolve_target(ctx, req).await?;
    let obj = object_id(ctx, &target).await?;
    call_on(
        ctx,
        &obj,
        "function() { this.scrollIntoViewIfNeeded(); this.click(); }",
        vec![],
    )
    .await?;
    if req.wait_nav {
        tokio::time::sleep(WAIT_NAV_SETTLE).await;
    }
    Ok(json!({"clicked": true}))
}

async fn act_type(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Value> {
    if req.text.is_empty() {
        return Err(Error::bad_input("text required for type"));
    }
    let target = resolve_target(ctx, req).await?;
    focus_target(ctx, &target).await?;

    let conn = ctx.bridge.conn()?;
    let sid = ctx.session.session_id.as_str();
    // Per-character key events so the page sees real input, not a value swap.
    for ch in req.text.chars() {
        let s = ch.to_string();
        conn.execute(
            Some(sid),
            "Input.dispatchKeyEvent",
            json!({"type": "char", "key": s, "text": s}),
            ctx.cancel,
        )
        .await?;
    }
    Ok(json!({"typed": req.text}))
}

async fn act_fill(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Value> {
    if req.selector.is_empty() {
        return Err(Error::bad_input("fill requires selector"));
    }
    let obj = object_id(ctx, &Target::Selector(req.selector.clone())).await?;
    call_on(ctx, &obj, "function(v) { this.value = v; }", vec![json!(req.text)]).await?;
    Ok(json!({"filled": req.text}))
}

async fn act_press(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Value> {
    if req.key.is_empty() {
        return Err(Error::bad_input("key required for press"));
    }
    send_key(ctx, &req.key).await?;
    Ok(json!({"pressed": req.key}))
}

async fn act_focus(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Value> {
    let target = resolve_target(ctx, req).await?;
    focus_target(ctx, &target).await?;
    Ok(json!({"focused": true}))
}

async fn focus_target(ctx: &ActionCtx<'_>, target: &Target) -> Result<()> {
    match target {
        Target::Node(node_id) => {
            let conn = ctx.bridge.conn()?;
            conn.execute(
                Some(&ctx.session.session_id),
                "DOM.focus",
                json!({"backendNodeId": node_id}),
                ctx.cancel,
            )
            .await?;
        }
        Target::Selector(_) => {
            let obj = object_id(ctx, target).await?;
            call_on(ctx, &obj, "function() { this.focus(); }", vec![]).await?;
        }
    }
    Ok(())
}

async fn act_hover(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Value> {
    let target = resolve_target(ctx, req).await?;
    let obj = object_id(ctx, &target).await?;
    call_on(
        ctx,
        &obj,
        "function() { this.scrollIntoViewIfNeeded(); \
         this.dispatchEvent(new MouseEvent('mouseover', { bubbles: true })); }",
        vec![],
    )
    .await?;
    Ok(json!({"hovered": true}))
}

async fn act_select(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Value> {
    if req.value.is_empty() {
        return Err(Error::bad_input("value required for select"));
    }
    let target = resolve_target(ctx, req).await?;
    let obj = object_id(ctx, &target).await?;
    call_on(
        ctx,
        &obj,
        "function(v) { this.value = v; this.dispatchEvent(new Event('change', { bubbles: true })); }",
        vec![json!(req.value)],
    )
    .await?;
    Ok(json!({"selected": req.value}))
}

async fn act_scroll(ctx: &ActionCtx<'_>, req: &ActionRequest) -> Result<Value> {
    if has_target(req) {
        let target = resolve_target(ctx, req).await?;
        let obj = object_id(ctx, &target).await?;
        call_on(
            ctx,
            &obj,
            "function() { this.scrollIntoView({ block: 'center' }); }",
            vec![],
        )
        .await?;
    } else {
        let conn = ctx.bridge.conn()?;
        let expr = if req.scroll_x != 0 || req.scroll_y != 0 {
            format!("window.scrollBy({}, {}); true", req.scroll_x, req.scroll_y)
        } else {
            // Default: one viewport down.
            "window.scrollBy(0, window.innerHeight); true".to_string()
        };
        conn.eval_in(&ctx.session.session_id, &expr, ctx.cancel)
            .await?;
    }
    Ok(json!({"scrolled": true}))
}
