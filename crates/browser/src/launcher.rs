//! Chrome process launch and CDP endpoint discovery.

use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use tabbridge_core::{Config, Error, Result};

/// A launched (or remotely attached) browser endpoint.
pub struct BrowserProcess {
    /// Child process when we launched Chrome ourselves.
    pub child: Option<Child>,
    /// Browser-level WebSocket debugger URL.
    pub ws_url: String,
}

/// Resolve the browser endpoint: attach to `CDP_URL` when configured,
/// otherwise launch a local Chrome. A missing browser is fatal.
pub async fn start(config: &Config) -> Result<BrowserProcess> {
    if !config.cdp_url.is_empty() {
        info!("Connecting to browser at {}", config.cdp_url);
        let ws_url = resolve_ws_url(&config.cdp_url).await?;
        return Ok(BrowserProcess { child: None, ws_url });
    }

    std::fs::create_dir_all(&config.profile_dir)?;
    mark_clean_exit(&config.profile_dir);

    let binary = find_chrome()
        .ok_or_else(|| Error::cdp("no Chrome/Chromium binary found; install one or set CDP_URL"))?;
    let port = free_port().await?;
    let args = chrome_args(config, port);

    info!(
        profile = %config.profile_dir.display(),
        headless = config.headless,
        port,
        "Launching browser"
    );

    let child = Command::new(&binary)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::cdp(format!("launch {}: {}", binary, e)))?;

    let ws_url = wait_for_cdp_ready(port, Duration::from_secs(15)).await?;
    Ok(BrowserProcess {
        child: Some(child),
        ws_url,
    })
}

/// Turn a configured CDP endpoint into a browser-level WebSocket URL.
/// `ws://`/`wss://` URLs pass through; `http(s)://` endpoints are asked for
/// their `webSocketDebuggerUrl` via `/json/version`.
pub async fn resolve_ws_url(cdp_url: &str) -> Result<String> {
    if cdp_url.starts_with("ws://") || cdp_url.starts_with("wss://") {
        return Ok(cdp_url.to_string());
    }
    let url = format!("{}/json/version", cdp_url.trim_end_matches('/'));
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| Error::cdp(format!("query {}: {}", url, e)))?;
    let body: Value = resp
        .json()
        .await
        .map_err(|e| Error::cdp(format!("parse {}: {}", url, e)))?;
    body.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::cdp(format!("no webSocketDebuggerUrl at {}", url)))
}

/// Find a Chromium-class binary on the system.
pub fn find_chrome() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

fn chrome_args(config: &Config, port: u16) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", port),
        format!("--user-data-dir={}", config.profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        // Hide the automation tells.
        "--disable-blink-features=AutomationControlled".to_string(),
        "--exclude-switches=enable-automation".to_string(),
        "--disable-infobars".to_string(),
        "--disable-popup-blocking".to_string(),
        "--enable-features=NetworkService,NetworkServiceInProcess".to_string(),
        format!("--user-agent={}", config.user_agent()),
        "--window-size=1440,900".to_string(),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Patch Chrome's preferences so a previous hard kill doesn't trigger the
/// "didn't shut down correctly" bar.
fn mark_clean_exit(profile_dir: &Path) {
    let prefs = profile_dir.join("Default").join("Preferences");
    let Ok(data) = std::fs::read_to_string(&prefs) else {
        return;
    };
    let patched = data
        .replace(r#""exit_type":"Crashed""#, r#""exit_type":"Normal""#)
        .replace(r#""exited_cleanly":false"#, r#""exited_cleanly":true"#);
    if patched != data {
        if let Err(e) = std::fs::write(&prefs, patched) {
            debug!("patch preferences: {}", e);
        }
    }
}

async fn free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::cdp(format!("bind for free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::cdp(format!("local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the debugger answers, up to `timeout`.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> Result<String> {
    let start = std::time::Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::cdp(format!(
                "browser CDP not ready after {:?} on port {}",
                timeout, port
            )));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_urls_pass_through() {
        let url = "ws://127.0.0.1:9222/devtools/browser/abc";
        let resolved = futures::executor::block_on(resolve_ws_url(url)).unwrap();
        assert_eq!(resolved, url);
    }

    #[test]
    fn headless_flag_present_only_when_configured() {
        let mut cfg = Config::default();
        cfg.headless = false;
        assert!(!chrome_args(&cfg, 9222).iter().any(|a| a.starts_with("--headless")));
        cfg.headless = true;
        assert!(chrome_args(&cfg, 9222).iter().any(|a| a == "--headless=new"));
    }

    #[test]
    fn args_carry_port_and_profile() {
        let cfg = Config::default();
        let args = chrome_args(&cfg, 12345);
        assert!(args.iter().any(|a| a == "--remote-debugging-port=12345"));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
    }
}
