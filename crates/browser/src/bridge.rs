//! Central bridge state: the browser connection, the tab session registry
//! and the per-tab ref caches.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tabbridge_core::{Config, Error, Result};

use crate::cdp::CdpConnection;
use crate::locks::LockManager;
use crate::navigate;
use crate::snapshot::AxNode;
use crate::state;

/// Injected into every tab before any document script runs. Deterministic;
/// the advertised Chrome version in the user agent is the only knob.
const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
if (!window.chrome) { window.chrome = {}; }
if (!window.chrome.runtime) { window.chrome.runtime = {}; }
const originalQuery = window.navigator.permissions.query;
window.navigator.permissions.query = (parameters) => (
    parameters.name === 'notifications' ?
        Promise.resolve({ state: Notification.permission }) :
        originalQuery(parameters)
);
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-GB', 'en-US', 'en'] });
"#;

/// A live CDP attachment to one page target. The cancellation token is a
/// child of the bridge root token; cancelling it aborts every in-flight call
/// derived from this tab.
#[derive(Debug)]
pub struct TabSession {
    pub target_id: String,
    pub session_id: String,
    pub cancel: CancellationToken,
}

/// A page target as reported by the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// The ref→node mapping and node list from one snapshot. Replaced as a
/// whole on every snapshot; never mutated in place.
#[derive(Debug, Default)]
pub struct RefCache {
    pub refs: HashMap<String, i64>,
    pub nodes: Vec<AxNode>,
}

#[derive(Default)]
struct Inner {
    tabs: HashMap<String, Arc<TabSession>>,
    ref_caches: HashMap<String, Arc<RefCache>>,
}

/// Bridge between the HTTP surface and the browser. Owns the CDP connection
/// (absent when the browser is unreachable), the session registry and the
/// lock manager.
pub struct Bridge {
    conn: Option<Arc<CdpConnection>>,
    inner: RwLock<Inner>,
    locks: LockManager,
    root: CancellationToken,
    config: Config,
    shutdown_done: AtomicBool,
}

impl Bridge {
    /// Connect to a browser-level WebSocket endpoint.
    pub async fn connect(config: Config, ws_url: &str) -> Result<Self> {
        let conn = CdpConnection::connect(ws_url).await?;
        Ok(Self {
            conn: Some(Arc::new(conn)),
            inner: RwLock::new(Inner::default()),
            locks: LockManager::new(),
            root: CancellationToken::new(),
            config,
            shutdown_done: AtomicBool::new(false),
        })
    }

    /// A bridge with no browser behind it. `/health` reports disconnected
    /// and every CDP-touching operation fails.
    pub fn disconnected(config: Config) -> Self {
        Self {
            conn: None,
            inner: RwLock::new(Inner::default()),
            locks: LockManager::new(),
            root: CancellationToken::new(),
            config,
            shutdown_done: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Root cancellation token; cancelled exactly once at shutdown.
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    pub fn conn(&self) -> Result<&Arc<CdpConnection>> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::cdp("browser not connected"))
    }

    /// All page-type targets currently known to the browser.
    pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
        let conn = self.conn()?;
        let result = conn
            .execute(None, "Target.getTargets", json!({}), &self.root)
            .await?;
        let infos: Vec<TargetInfo> = serde_json::from_value(
            result.get("targetInfos").cloned().unwrap_or_else(|| json!([])),
        )
        .map_err(|e| Error::cdp(format!("parse targetInfos: {}", e)))?;
        Ok(infos.into_iter().filter(|t| t.kind == "page").collect())
    }

    /// Resolve a tab id to its session, attaching lazily. An empty id picks
    /// the first page target. Every failure here is a 404: the tab either
    /// cannot be named or does not exist.
    pub async fn resolve_tab(&self, tab_id: &str) -> Result<(Arc<TabSession>, String)> {
        let id = if tab_id.is_empty() {
            let targets = self
                .list_targets()
                .await
                .map_err(|e| Error::not_found(format!("list targets: {}", e)))?;
            match targets.first() {
                Some(t) => t.target_id.clone(),
                None => return Err(Error::not_found("no tabs open")),
            }
        } else {
            tab_id.to_string()
        };

        // Fast path under the read lock.
        {
            let inner = self.inner.read().await;
            if let Some(session) = inner.tabs.get(&id) {
                return Ok((Arc::clone(session), id));
            }
        }

        // Slow path: write lock, double-check, attach.
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.tabs.get(&id) {
            return Ok((Arc::clone(session), id));
        }
        let session = self
            .attach(&id)
            .await
            .map_err(|e| Error::not_found(format!("tab {} not found: {}", id, e)))?;
        let session = Arc::new(session);
        inner.tabs.insert(id.clone(), Arc::clone(&session));
        Ok((session, id))
    }

    /// Attach to an existing target and prepare the session: enable the
    /// domains every operation relies on, inject the init script, apply the
    /// configured timezone and resource blocking.
    async fn attach(&self, target_id: &str) -> Result<TabSession> {
        let conn = self.conn()?;
        let cancel = self.root.child_token();

        let result = conn
            .execute(
                None,
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
                &cancel,
            )
            .await?;
        let session_id = result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::cdp("attach: no sessionId returned"))?
            .to_string();

        if let Err(e) = self.init_session(conn, &session_id, &cancel).await {
            cancel.cancel();
            return Err(e);
        }

        Ok(TabSession {
            target_id: target_id.to_string(),
            session_id,
            cancel,
        })
    }

    async fn init_session(
        &self,
        conn: &CdpConnection,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for domain in ["Page", "Runtime", "DOM", "Network", "Accessibility"] {
            conn.execute(Some(session_id), &format!("{}.enable", domain), json!({}), cancel)
                .await?;
        }
        conn.execute(
            Some(session_id),
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": STEALTH_INIT_SCRIPT}),
            cancel,
        )
        .await?;

        if let Some(tz) = &self.config.timezone {
            if let Err(e) = conn
                .execute(
                    Some(session_id),
                    "Emulation.setTimezoneOverride",
                    json!({"timezoneId": tz}),
                    cancel,
                )
                .await
            {
                debug!("timezone override: {}", e);
            }
        }

        if self.config.block_media {
            navigate::set_blocked_urls(conn, session_id, navigate::MEDIA_BLOCK_PATTERNS, cancel)
                .await?;
        } else if self.config.block_images {
            navigate::set_blocked_urls(conn, session_id, navigate::IMAGE_BLOCK_PATTERNS, cancel)
                .await?;
        }
        Ok(())
    }

    /// Register an attached session under its target id. The create/attach
    /// paths do this internally; it is public for wiring externally built
    /// sessions (and fakes) into the registry.
    pub async fn register(&self, session: TabSession) {
        let mut inner = self.inner.write().await;
        inner.tabs.insert(session.target_id.clone(), Arc::new(session));
    }

    /// Open a new tab, run per-tab init and navigate it to `url`
    /// (`about:blank` when empty).
    pub async fn create_tab(&self, url: &str) -> Result<(String, Arc<TabSession>)> {
        let conn = self.conn()?;
        let result = conn
            .execute(None, "Target.createTarget", json!({"url": "about:blank"}), &self.root)
            .await
            .map_err(|e| Error::cdp(format!("new tab: {}", e)))?;
        let target_id = result
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::cdp("createTarget: no targetId returned"))?
            .to_string();

        let (session, id) = match self.resolve_tab(&target_id).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = conn
                    .execute(None, "Target.closeTarget", json!({"targetId": target_id}), &self.root)
                    .await;
                return Err(Error::cdp(format!("attach new tab: {}", e)));
            }
        };

        if !url.is_empty() && url != "about:blank" {
            if let Err(e) = navigate::navigate(
                conn,
                &session.session_id,
                url,
                self.config.navigate_timeout,
                &session.cancel,
            )
            .await
            {
                let _ = self.close_tab(&id).await;
                return Err(e);
            }
        }

        Ok((id, session))
    }

    /// Close a tab: cancel its session, ask the browser to close the target
    /// (bounded), drop the registration and ref cache. Idempotent: unknown
    /// ids and repeat closes return without error, and an untracked but
    /// extant tab still gets the close request.
    pub async fn close_tab(&self, tab_id: &str) -> Result<()> {
        let conn = self.conn()?;
        {
            let mut inner = self.inner.write().await;
            if let Some(session) = inner.tabs.remove(tab_id) {
                session.cancel.cancel();
            }
            inner.ref_caches.remove(tab_id);
        }

        let close = conn.execute(
            None,
            "Target.closeTarget",
            json!({"targetId": tab_id}),
            &self.root,
        );
        match tokio::time::timeout(self.config.close_timeout, close).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("closeTarget {}: {}", tab_id, e),
            Err(_) => debug!("closeTarget {}: timed out", tab_id),
        }
        Ok(())
    }

    /// Drop registrations (and ref caches) for targets no longer alive.
    /// Returns the reaped tab ids.
    pub async fn prune_stale(&self, alive: &HashSet<String>) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let mut reaped = Vec::new();
        inner.tabs.retain(|id, session| {
            if alive.contains(id) {
                true
            } else {
                session.cancel.cancel();
                reaped.push(id.clone());
                false
            }
        });
        inner.ref_caches.retain(|id, _| alive.contains(id));
        for id in &reaped {
            info!("Reaped stale tab: {}", id);
        }
        reaped
    }

    /// Periodically reconcile the registry against the browser's target
    /// list. Runs until the root token is cancelled.
    pub async fn reap_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = self.root.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let targets = match self.list_targets().await {
                Ok(t) => t,
                Err(_) => continue,
            };
            let alive: HashSet<String> = targets.into_iter().map(|t| t.target_id).collect();
            self.prune_stale(&alive).await;
        }
    }

    // ── Ref cache ─────────────────────────────────────────────

    pub async fn ref_cache(&self, tab_id: &str) -> Option<Arc<RefCache>> {
        let inner = self.inner.read().await;
        inner.ref_caches.get(tab_id).cloned()
    }

    /// Replace a tab's ref cache atomically.
    pub async fn set_ref_cache(&self, tab_id: &str, cache: RefCache) {
        let mut inner = self.inner.write().await;
        inner.ref_caches.insert(tab_id.to_string(), Arc::new(cache));
    }

    /// Navigation and tab close invalidate the cache.
    pub async fn delete_ref_cache(&self, tab_id: &str) {
        let mut inner = self.inner.write().await;
        inner.ref_caches.remove(tab_id);
    }

    /// Save state and cancel the root token. Only the first call acts.
    pub async fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        state::save(self).await;
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_session(id: &str) -> TabSession {
        TabSession {
            target_id: id.to_string(),
            session_id: format!("sess-{}", id),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn disconnected_bridge_resolves_nothing() {
        let b = Bridge::disconnected(Config::default());
        let err = b.resolve_tab("").await.unwrap_err();
        assert_eq!(err.status(), 404);
        let err = b.resolve_tab("abc").await.unwrap_err();
        assert_eq!(err.status(), 404);
        assert!(b.list_targets().await.is_err());
    }

    #[tokio::test]
    async fn registered_tab_resolves_without_browser() {
        let b = Bridge::disconnected(Config::default());
        b.register(fake_session("tab1")).await;
        let (session, id) = b.resolve_tab("tab1").await.unwrap();
        assert_eq!(id, "tab1");
        assert_eq!(session.target_id, "tab1");
    }

    #[tokio::test]
    async fn create_tab_without_browser_is_upstream_failure() {
        let b = Bridge::disconnected(Config::default());
        let err = b.create_tab("https://example.com").await.unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn ref_cache_set_get_delete() {
        let b = Bridge::disconnected(Config::default());
        assert!(b.ref_cache("t").await.is_none());

        let mut refs = HashMap::new();
        refs.insert("e0".to_string(), 42);
        b.set_ref_cache("t", RefCache { refs, nodes: vec![] }).await;
        assert_eq!(b.ref_cache("t").await.unwrap().refs["e0"], 42);

        b.delete_ref_cache("t").await;
        assert!(b.ref_cache("t").await.is_none());
    }

    #[tokio::test]
    async fn ref_cache_replacement_is_whole_value() {
        let b = Bridge::disconnected(Config::default());
        let mut refs = HashMap::new();
        refs.insert("e0".to_string(), 1);
        b.set_ref_cache("t", RefCache { refs, nodes: vec![] }).await;

        let old = b.ref_cache("t").await.unwrap();

        let mut refs = HashMap::new();
        refs.insert("e0".to_string(), 2);
        b.set_ref_cache("t", RefCache { refs, nodes: vec![] }).await;

        // The old snapshot is unchanged; the new one is fully in place.
        assert_eq!(old.refs["e0"], 1);
        assert_eq!(b.ref_cache("t").await.unwrap().refs["e0"], 2);
    }

    #[tokio::test]
    async fn prune_drops_vanished_tabs_and_caches() {
        let b = Bridge::disconnected(Config::default());
        b.register(fake_session("alive")).await;
        b.register(fake_session("gone")).await;
        b.set_ref_cache("gone", RefCache::default()).await;

        let (gone_session, _) = b.resolve_tab("gone").await.unwrap();

        let alive: HashSet<String> = ["alive".to_string()].into_iter().collect();
        let reaped = b.prune_stale(&alive).await;

        assert_eq!(reaped, vec!["gone".to_string()]);
        assert!(gone_session.cancel.is_cancelled());
        assert!(b.resolve_tab("gone").await.is_err());
        assert!(b.ref_cache("gone").await.is_none());
        assert!(b.resolve_tab("alive").await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_cancels_root_once() {
        let b = Bridge::disconnected(Config::default());
        let child = b.root_token().child_token();
        b.shutdown().await;
        b.shutdown().await;
        assert!(child.is_cancelled());
    }
}
