use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Runtime configuration. Defaults are overridden first by an optional JSON
/// config file (`BRIDGE_CONFIG`), then by individual environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Bearer token for the HTTP surface. Empty = no auth.
    pub token: String,
    /// Remote CDP endpoint. Empty = launch Chrome ourselves.
    pub cdp_url: String,
    pub state_dir: PathBuf,
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub no_restore: bool,
    /// Chrome major version advertised in the user agent.
    pub chrome_version: String,
    pub block_images: bool,
    pub block_media: bool,
    pub action_timeout: Duration,
    pub navigate_timeout: Duration,
    pub close_timeout: Duration,
    /// IANA timezone injected into every tab session, e.g. "Europe/London".
    pub timezone: Option<String>,
}

/// On-disk config file shape (all fields optional).
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    port: Option<u16>,
    token: Option<String>,
    headless: Option<bool>,
    no_restore: Option<bool>,
    timeout_sec: Option<u64>,
    navigate_sec: Option<u64>,
    timezone: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".tabbridge"))
            .unwrap_or_else(|| PathBuf::from(".tabbridge"));
        Self {
            port: 18800,
            token: String::new(),
            cdp_url: String::new(),
            profile_dir: base.join("chrome-profile"),
            state_dir: base,
            headless: false,
            no_restore: false,
            chrome_version: "144".to_string(),
            block_images: false,
            block_media: false,
            action_timeout: Duration::from_secs(15),
            navigate_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            timezone: None,
        }
    }
}

impl Config {
    /// Load config: defaults, then file, then environment.
    pub fn load() -> Result<Self> {
        let mut cfg = Config::default();
        if let Ok(path) = std::env::var("BRIDGE_CONFIG") {
            if !path.is_empty() {
                cfg.apply_file(Path::new(&path))?;
            }
        }
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let data = std::fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&data)?;
        if let Some(p) = file.port {
            self.port = p;
        }
        if let Some(t) = file.token {
            self.token = t;
        }
        if let Some(h) = file.headless {
            self.headless = h;
        }
        if let Some(n) = file.no_restore {
            self.no_restore = n;
        }
        if let Some(s) = file.timeout_sec {
            self.action_timeout = Duration::from_secs(s);
        }
        if let Some(s) = file.navigate_sec {
            self.navigate_timeout = Duration::from_secs(s);
        }
        if file.timezone.is_some() {
            self.timezone = file.timezone;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(p) = env_nonempty("BRIDGE_PORT").and_then(|v| v.parse().ok()) {
            self.port = p;
        }
        if let Some(t) = env_nonempty("BRIDGE_TOKEN") {
            self.token = t;
        }
        if let Some(u) = env_nonempty("CDP_URL") {
            self.cdp_url = u;
        }
        if let Some(d) = env_nonempty("BRIDGE_STATE_DIR") {
            self.state_dir = PathBuf::from(d);
        }
        if let Some(d) = env_nonempty("BRIDGE_PROFILE") {
            self.profile_dir = PathBuf::from(d);
        }
        if env_is_true("BRIDGE_HEADLESS") {
            self.headless = true;
        }
        if env_is_true("BRIDGE_NO_RESTORE") {
            self.no_restore = true;
        }
        if let Some(v) = env_nonempty("BRIDGE_CHROME_VERSION") {
            self.chrome_version = v;
        }
        if env_is_true("BRIDGE_BLOCK_IMAGES") {
            self.block_images = true;
        }
        if env_is_true("BRIDGE_BLOCK_MEDIA") {
            self.block_media = true;
        }
        if let Some(s) = env_nonempty("BRIDGE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.action_timeout = Duration::from_secs(s);
        }
        if let Some(s) = env_nonempty("BRIDGE_NAV_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.navigate_timeout = Duration::from_secs(s);
        }
    }

    /// How often the stale-tab reaper scans the target list.
    pub fn reap_interval(&self) -> Duration {
        self.action_timeout * 30
    }

    /// User agent advertised by launched browsers.
    pub fn user_agent(&self) -> String {
        format!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/{}.0.0.0 Safari/537.36",
            self.chrome_version
        )
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.state_dir.join("sessions.json")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.state_dir.join("screenshots")
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_is_true(key: &str) -> bool {
    std::env::var(key).map(|v| v == "true" || v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 18800);
        assert_eq!(cfg.action_timeout, Duration::from_secs(15));
        assert_eq!(cfg.navigate_timeout, Duration::from_secs(30));
        assert_eq!(cfg.close_timeout, Duration::from_secs(5));
        assert!(cfg.token.is_empty());
        assert!(!cfg.headless);
    }

    #[test]
    fn reap_interval_scales_with_action_timeout() {
        let mut cfg = Config::default();
        cfg.action_timeout = Duration::from_secs(2);
        assert_eq!(cfg.reap_interval(), Duration::from_secs(60));
    }

    #[test]
    fn config_file_all_fields() {
        let dir = std::env::temp_dir().join("tabbridge-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{
                "port": 9999,
                "headless": true,
                "token": "test-token",
                "noRestore": true,
                "timeoutSec": 20,
                "navigateSec": 45
            }"#,
        )
        .unwrap();

        let mut cfg = Config::default();
        cfg.apply_file(&path).unwrap();

        assert_eq!(cfg.port, 9999);
        assert!(cfg.headless);
        assert!(cfg.no_restore);
        assert_eq!(cfg.token, "test-token");
        assert_eq!(cfg.action_timeout, Duration::from_secs(20));
        assert_eq!(cfg.navigate_timeout, Duration::from_secs(45));
    }

    #[test]
    fn config_file_partial_leaves_defaults() {
        let dir = std::env::temp_dir().join("tabbridge-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.json");
        std::fs::write(&path, r#"{"port": 8080}"#).unwrap();

        let mut cfg = Config::default();
        cfg.apply_file(&path).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.action_timeout, Duration::from_secs(15));
    }

    #[test]
    fn user_agent_carries_chrome_version() {
        let mut cfg = Config::default();
        cfg.chrome_version = "131".to_string();
        assert!(cfg.user_agent().contains("Chrome/131.0.0.0"));
    }
}
