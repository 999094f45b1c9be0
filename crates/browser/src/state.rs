//! Session persistence: open tabs are written to `<stateDir>/sessions.json`
//! at shutdown and reopened at startup unless restore is disabled.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;

const RESTORE_TAB_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabState {
    pub id: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub tabs: Vec<TabState>,
    pub saved_at: String,
}

/// Only real web pages are worth persisting.
fn persistable(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Write the current tab list to disk. Best-effort: failures are logged,
/// never propagated.
pub async fn save(bridge: &Bridge) {
    let targets = match bridge.list_targets().await {
        Ok(t) => t,
        Err(e) => {
            debug!("save state: {}", e);
            return;
        }
    };

    let tabs: Vec<TabState> = targets
        .into_iter()
        .filter(|t| persistable(&t.url))
        .map(|t| TabState {
            id: t.target_id,
            url: t.url,
            title: t.title,
        })
        .collect();

    let state = SessionState {
        saved_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        tabs,
    };

    let path = bridge.config().sessions_file();
    if let Err(e) = std::fs::create_dir_all(&bridge.config().state_dir) {
        warn!("create state dir: {}", e);
        return;
    }
    match serde_json::to_vec_pretty(&state) {
        Ok(data) => match std::fs::write(&path, data) {
            Ok(()) => info!("Saved {} tabs to {}", state.tabs.len(), path.display()),
            Err(e) => warn!("write state: {}", e),
        },
        Err(e) => warn!("marshal state: {}", e),
    }
}

/// Reopen tabs from a previous run. Each tab gets a bounded create+navigate;
/// failures are logged and skipped.
pub async fn restore(bridge: &Bridge) {
    if bridge.config().no_restore {
        return;
    }
    let path = bridge.config().sessions_file();
    let Ok(data) = std::fs::read_to_string(&path) else {
        return;
    };
    let state: SessionState = match serde_json::from_str(&data) {
        Ok(s) => s,
        Err(e) => {
            warn!("parse saved state: {}", e);
            return;
        }
    };

    let mut restored = 0;
    for tab in &state.tabs {
        if !persistable(&tab.url) || tab.url.contains("/sorry/") {
            continue;
        }
        match tokio::time::timeout(RESTORE_TAB_TIMEOUT, bridge.create_tab(&tab.url)).await {
            Ok(Ok(_)) => restored += 1,
            Ok(Err(e)) => warn!("restore tab {}: {}", tab.url, e),
            Err(_) => warn!("restore tab {}: timed out", tab.url),
        }
    }
    if restored > 0 {
        info!("Restored {}/{} tabs from previous session", restored, state.tabs.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_web_urls_persist() {
        assert!(persistable("https://example.com/a"));
        assert!(persistable("http://localhost:3000"));
        assert!(!persistable("about:blank"));
        assert!(!persistable("chrome://newtab/"));
        assert!(!persistable(""));
        assert!(!persistable("file:///etc/hosts"));
    }

    #[test]
    fn state_round_trips_with_wire_names() {
        let state = SessionState {
            tabs: vec![TabState {
                id: "T1".into(),
                url: "https://example.com".into(),
                title: "Example".into(),
            }],
            saved_at: "2026-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"savedAt\""));
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tabs[0].id, "T1");
    }
}
