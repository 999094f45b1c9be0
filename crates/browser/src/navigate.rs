//! Page navigation, title waiting and resource blocking.

use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tabbridge_core::{Error, Result};

use crate::cdp::CdpConnection;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// URL patterns for image blocking.
pub const IMAGE_BLOCK_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.avif",
];

/// URL patterns for heavy-media blocking: images plus css, fonts and av.
pub const MEDIA_BLOCK_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.avif",
    "*.css", "*.woff", "*.woff2", "*.ttf", "*.otf",
    "*.mp4", "*.webm", "*.mp3", "*.ogg", "*.wav",
];

/// Navigate a tab and wait for DOM-ready. Waiting for the full load event
/// hangs on single-page apps with permanently pending sub-resources, so
/// readiness is `document.readyState` leaving "loading".
pub async fn navigate(
    conn: &CdpConnection,
    session: &str,
    url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let result = conn
        .execute(Some(session), "Page.navigate", json!({"url": url}), cancel)
        .await?;
    if let Some(err) = result.get("errorText").and_then(|v| v.as_str()) {
        if !err.is_empty() {
            return Err(Error::cdp(format!("navigate {}: {}", url, err)));
        }
    }

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match conn.eval_in(session, "document.readyState", cancel).await {
            Ok(state) if state.as_str() != Some("loading") => return Ok(()),
            Ok(_) => {}
            // Evaluation races the navigation's context teardown; retry.
            Err(e) => debug!("readyState poll: {}", e),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::cdp(format!("navigate {}: timed out", url)));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Poll `document.title` up to `bound`, returning the first non-empty title
/// observed, else "".
pub async fn wait_for_title(
    conn: &CdpConnection,
    session: &str,
    bound: Duration,
    cancel: &CancellationToken,
) -> String {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if let Ok(title) = conn.eval_in(session, "document.title", cancel).await {
            if let Some(t) = title.as_str() {
                if !t.is_empty() {
                    return t.to_string();
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return String::new();
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Toggle URL-pattern blocking on a tab. An empty set clears blocking.
pub async fn set_blocked_urls(
    conn: &CdpConnection,
    session: &str,
    patterns: &[&str],
    cancel: &CancellationToken,
) -> Result<()> {
    conn.execute(
        Some(session),
        "Network.setBlockedURLs",
        json!({"urls": patterns}),
        cancel,
    )
    .await?;
    Ok(())
}

/// Best-effort page location; failures read as "".
pub async fn page_url(conn: &CdpConnection, session: &str, cancel: &CancellationToken) -> String {
    conn.eval_in(session, "location.href", cancel)
        .await
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default()
}

/// Best-effort page title; failures read as "".
pub async fn page_title(conn: &CdpConnection, session: &str, cancel: &CancellationToken) -> String {
    conn.eval_in(session, "document.title", cancel)
        .await
        .ok()
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_default()
}
