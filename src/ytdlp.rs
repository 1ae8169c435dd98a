use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::AppConfig;
use crate::media::{ExtractionRequest, MediaCollaborator, MediaError, Metadata};
use crate::util;

const STDERR_TAIL_LINES: usize = 50;

// Lowercased stderr fragments, checked in order.
const INVALID_URL_MARKERS: &[&str] = &["is not a valid url", "unsupported url"];
const UNAVAILABLE_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "has been removed",
    "available in your country",
    "this video is not available",
    "members-only content",
];

/// `MediaCollaborator` backed by the `yt-dlp` executable.
pub struct YtDlp {
    config: Arc<AppConfig>,
}

#[derive(Deserialize)]
struct InfoJson {
    title: Option<String>,
    uploader: Option<String>,
    thumbnail: Option<String>,
}

impl YtDlp {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

async fn collect_stderr(stderr: ChildStderr, buf: Arc<AsyncMutex<VecDeque<String>>>) {
    let mut r = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match r.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let l = line.trim_end().to_string();
                if !l.is_empty() {
                    debug!("[YTDLP] {}", l);
                    let mut g = buf.lock().await;
                    if g.len() >= STDERR_TAIL_LINES {
                        g.pop_front();
                    }
                    g.push_back(l);
                }
            }
            Err(_) => break,
        }
    }
}

async fn render_tail(buf: &AsyncMutex<VecDeque<String>>) -> String {
    let g = buf.lock().await;
    if g.is_empty() {
        return "no stderr output captured".to_string();
    }
    g.iter().cloned().collect::<Vec<_>>().join("\n")
}

fn find_ffmpeg(cfg: &AppConfig) -> Option<PathBuf> {
    if let Some(p) = &cfg.ffmpeg_bin {
        return Some(p.clone());
    }
    // Common macOS/Homebrew and Linux locations.
    ["/opt/homebrew/bin/ffmpeg", "/usr/local/bin/ffmpeg", "/usr/bin/ffmpeg"]
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

fn build_base_command(cfg: &AppConfig) -> Command {
    let mut cmd = Command::new(&cfg.ytdlp_bin);
    cmd.env("PATH", &cfg.ytdlp_path);

    if !cfg.inherit_proxy_env {
        // Avoid being accidentally bound to a dead local proxy (common in shell env).
        cmd.env_remove("http_proxy")
            .env_remove("https_proxy")
            .env_remove("HTTP_PROXY")
            .env_remove("HTTPS_PROXY")
            .env_remove("no_proxy")
            .env_remove("NO_PROXY");
    }

    if let Some(p) = &cfg.ytdlp_proxy {
        cmd.arg("--proxy").arg(p);
    }
    if let Some(cookies) = &cfg.cookies_file {
        cmd.arg("--cookies").arg(cookies);
    }

    cmd.arg("--no-playlist").arg("--no-cache-dir").arg("--no-part");
    cmd.args(&cfg.ytdlp_extra_args);
    cmd
}

fn build_info_command(cfg: &AppConfig, url: &str) -> Command {
    let mut cmd = build_base_command(cfg);
    cmd.arg("-J")
        .arg("--no-warnings")
        // Everything after `--` is a URL, never an option.
        .arg("--")
        .arg(url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

fn build_extract_command(cfg: &AppConfig, request: &ExtractionRequest) -> Command {
    let options = &request.options;
    let stem = util::sanitize_filename(&request.title);
    let template = request
        .output_dir
        .join(format!("{}.%(ext)s", util::escape_output_template(&stem)));

    let mut cmd = build_base_command(cfg);
    cmd.arg("-f")
        .arg("ba/b")
        .arg("-x")
        .arg("--audio-format")
        .arg(options.codec.audio_format())
        .arg("--audio-quality")
        .arg(options.resolved_quality().as_arg())
        .arg("--embed-metadata")
        .arg("--embed-chapters")
        .arg("--embed-thumbnail");

    if let Some(ffmpeg) = find_ffmpeg(cfg) {
        cmd.arg("--ffmpeg-location").arg(ffmpeg);
    }

    cmd.arg("-o")
        .arg(template)
        .arg("--")
        .arg(&request.url)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Turn yt-dlp's stderr into a typed failure.
pub fn classify_failure(url: &str, stderr: &str) -> MediaError {
    let lower = stderr.to_ascii_lowercase();
    if INVALID_URL_MARKERS.iter().any(|m| lower.contains(m)) {
        MediaError::InvalidUrl(url.to_string())
    } else if UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        MediaError::VideoUnavailable(stderr.trim().to_string())
    } else {
        MediaError::ExtractionFailed(stderr.trim().to_string())
    }
}

fn parse_info(stdout: &[u8]) -> Result<Metadata, MediaError> {
    let info: InfoJson = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::ExtractionFailed(format!("Failed to parse yt-dlp JSON: {}", e)))?;
    let title = info
        .title
        .ok_or_else(|| MediaError::ExtractionFailed("yt-dlp JSON has no title".to_string()))?;
    Ok(Metadata {
        thumbnail_url: info.thumbnail.unwrap_or_default(),
        title,
        uploader: info.uploader.unwrap_or_default(),
    })
}

#[async_trait]
impl MediaCollaborator for YtDlp {
    async fn fetch_metadata(&self, url: &str) -> Result<Metadata, MediaError> {
        info!("[YTDLP] Fetching metadata: url={}", url);

        let out = build_info_command(&self.config, url)
            .output()
            .await
            .map_err(|e| MediaError::ExtractionFailed(format!("Failed to run yt-dlp: {}", e)))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            debug!("[YTDLP] Metadata fetch failed (status={}): {}", out.status, stderr.trim());
            return Err(classify_failure(url, &stderr));
        }

        parse_info(&out.stdout)
    }

    async fn extract_audio(&self, request: &ExtractionRequest) -> Result<PathBuf, MediaError> {
        let mut cmd = build_extract_command(&self.config, request);
        let mut child = cmd
            .spawn()
            .map_err(|e| MediaError::ExtractionFailed(format!("Failed to start yt-dlp: {}", e)))?;
        if let Some(pid) = child.id() {
            info!("[YTDLP] Extraction started (pid={}) url={}", pid, request.url);
        }

        let tail_buf: Arc<AsyncMutex<VecDeque<String>>> = Arc::new(AsyncMutex::new(VecDeque::new()));
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ExtractionFailed("Failed to capture yt-dlp stderr".to_string()))?;
        let tail_buf_clone = tail_buf.clone();
        let stderr_task = tokio::spawn(async move { collect_stderr(stderr, tail_buf_clone).await });

        let status = child.wait().await;
        let _ = stderr_task.await;
        let status = match status {
            Ok(s) => s,
            Err(e) => {
                let tail = render_tail(&tail_buf).await;
                return Err(MediaError::ExtractionFailed(format!(
                    "Failed waiting for yt-dlp: {}\n{}",
                    e, tail
                )));
            }
        };

        if !status.success() {
            let tail = render_tail(&tail_buf).await;
            return Err(classify_failure(&request.url, &tail));
        }

        let path = request
            .output_dir
            .join(util::output_filename(&request.title, request.options.codec));
        let meta = tokio::fs::metadata(&path).await.map_err(|e| {
            MediaError::ExtractionFailed(format!(
                "Extraction succeeded but output file missing ({}): {}",
                path.display(),
                e
            ))
        })?;
        if meta.len() == 0 {
            return Err(MediaError::ExtractionFailed(format!(
                "Extraction succeeded but output file is empty ({})",
                path.display()
            )));
        }

        info!("[YTDLP] Extraction completed: {} ({} bytes)", path.display(), meta.len());
        Ok(path)
    }
}
