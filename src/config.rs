use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub max_concurrent_extractions: usize,

    // Per-session subdirectories are created below this.
    pub cache_dir: PathBuf,
    pub session_ttl: Duration,
    pub reap_interval: Duration,

    pub ytdlp_bin: PathBuf,
    pub ytdlp_path: String,
    pub ffmpeg_bin: Option<PathBuf>,
    // Explicit yt-dlp proxy (e.g. socks5://127.0.0.1:7890).
    pub ytdlp_proxy: Option<String>,
    // Whether to let yt-dlp inherit http_proxy/https_proxy from the service environment.
    pub inherit_proxy_env: bool,
    // Netscape-format cookie jar handed to yt-dlp as-is.
    pub cookies_file: Option<PathBuf>,
    pub ytdlp_extra_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    listen_addr: Option<String>,
    max_concurrent_extractions: Option<usize>,

    cache_dir: Option<String>,
    session_ttl_secs: Option<u64>,
    reap_interval_secs: Option<u64>,

    ytdlp_bin: Option<String>,
    ytdlp_path: Option<String>,
    ffmpeg_bin: Option<String>,
    ytdlp_proxy: Option<String>,
    inherit_proxy_env: Option<bool>,
    cookies_file: Option<String>,
    ytdlp_extra_args: Option<Vec<String>>,
}

fn default_ytdlp_path() -> String {
    // Prefer inheriting PATH from the service process; override via config.toml when
    // yt-dlp or ffmpeg live elsewhere.
    std::env::var("PATH").unwrap_or_else(|_| {
        "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin".to_string()
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.and_then(|s| {
        let s = s.trim().to_string();
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    })
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config file: {}",
                path.to_string_lossy().as_ref()
            )
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: AppConfigFile = toml::from_str(raw).context("Failed to parse config.toml")?;
        Self::from_file(file)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let cfg = Self {
            listen_addr: file.listen_addr.unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            max_concurrent_extractions: file.max_concurrent_extractions.unwrap_or(4),

            cache_dir: non_empty(file.cache_dir)
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("soundharvest")),
            session_ttl: Duration::from_secs(file.session_ttl_secs.unwrap_or(3600)),
            reap_interval: Duration::from_secs(file.reap_interval_secs.unwrap_or(300)),

            ytdlp_bin: PathBuf::from(file.ytdlp_bin.unwrap_or_else(|| "yt-dlp".to_string())),
            ytdlp_path: file.ytdlp_path.unwrap_or_else(default_ytdlp_path),
            ffmpeg_bin: non_empty(file.ffmpeg_bin).map(PathBuf::from),
            ytdlp_proxy: non_empty(file.ytdlp_proxy),
            inherit_proxy_env: file.inherit_proxy_env.unwrap_or(false),
            cookies_file: non_empty(file.cookies_file).map(PathBuf::from),
            ytdlp_extra_args: file.ytdlp_extra_args.unwrap_or_default(),
        };

        if cfg.max_concurrent_extractions == 0 {
            return Err(anyhow!("max_concurrent_extractions must be at least 1"));
        }
        if cfg.session_ttl.is_zero() {
            return Err(anyhow!("session_ttl_secs must be at least 1"));
        }
        if cfg.reap_interval.is_zero() {
            return Err(anyhow!("reap_interval_secs must be at least 1"));
        }

        Ok(cfg)
    }
}
