//! Media extraction collaborator.
//!
//! Everything site-specific is delegated to `yt-dlp`; this module only builds
//! its command lines and turns its output into something the routes can serve.

use std::{io::ErrorKind, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{ChildStderr, Command},
    sync::oneshot,
    task::JoinHandle,
    time::{Duration, timeout},
};
use tracing::{debug, warn};

pub const DEFAULT_YT_DLP_PROGRAM: &str = "yt-dlp";
const YT_DLP_TIMEOUT_SECONDS: u64 = 180;
const FIRST_CHUNK_BYTES: usize = 64 * 1024;
const STDERR_TAIL_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Video { quality: String },
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub video_id: String,
    pub kind: MediaKind,
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub video_id: String,
    pub title: String,
    pub author: String,
    pub duration: String,
    pub views: Option<u64>,
    pub thumbnail: Option<String>,
}

pub struct MediaStream {
    pub filename: String,
    pub content_type: &'static str,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves once the producer has exited; an error means the client got
    /// a truncated artifact.
    pub finished: oneshot::Receiver<Result<(), FetchError>>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("yt-dlp is not installed on this server")]
    NotInstalled,
    #[error("the extraction took too long, try another video or quality")]
    TimedOut,
    #[error("{0}")]
    Failed(String),
    #[error("could not read video metadata: {0}")]
    InvalidMetadata(String),
    #[error("could not run yt-dlp: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn probe(&self, url: &str) -> Result<VideoInfo, FetchError>;

    async fn stream(&self, request: &FetchRequest) -> Result<MediaStream, FetchError>;
}

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    thumbnail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: PathBuf,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_YT_DLP_PROGRAM)
    }
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn probe(&self, url: &str) -> Result<VideoInfo, FetchError> {
        let mut command = self.command();
        command.args(["-J", "--no-playlist", "--no-warnings", url]);
        let output = timeout(Duration::from_secs(YT_DLP_TIMEOUT_SECONDS), command.output())
            .await
            .map_err(|_| FetchError::TimedOut)?
            .map_err(spawn_error)?;

        if !output.status.success() {
            return Err(FetchError::Failed(run_error_message(&output.stderr)));
        }

        let info: YtDlpVideoInfo = serde_json::from_slice(&output.stdout)
            .map_err(|error| FetchError::InvalidMetadata(error.to_string()))?;

        Ok(VideoInfo {
            video_id: info.id.unwrap_or_default(),
            title: info
                .title
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string()),
            author: info
                .uploader
                .or(info.channel)
                .unwrap_or_else(|| "Unknown".to_string()),
            duration: info.duration.map(format_duration).unwrap_or_default(),
            views: info.view_count,
            thumbnail: info.thumbnail,
        })
    }

    async fn stream(&self, request: &FetchRequest) -> Result<MediaStream, FetchError> {
        let (selector, extension) = format_selector(&request.kind);

        let mut child = self
            .command()
            .args(["--no-playlist", "--no-warnings", "--no-part", "-f"])
            .arg(selector)
            .arg("--max-filesize")
            .arg(request.max_file_size_bytes.to_string())
            .args(["-o", "-"])
            .arg(&request.url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let stderr_tail = drain_stderr(child.stderr.take());
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Failed("yt-dlp produced no output pipe".to_string()))?;

        // Hold the response back until yt-dlp has produced media, so that
        // extraction failures still surface as errors instead of empty files.
        let mut first_chunk = vec![0; FIRST_CHUNK_BYTES];
        let read = timeout(
            Duration::from_secs(YT_DLP_TIMEOUT_SECONDS),
            stdout.read(&mut first_chunk),
        )
        .await
        .map_err(|_| FetchError::TimedOut)??;

        if read == 0 {
            child.wait().await?;
            let stderr = stderr_tail.await.unwrap_or_default();
            return Err(FetchError::Failed(run_error_message(&stderr)));
        }
        first_chunk.truncate(read);

        let (finished_tx, finished) = oneshot::channel();
        let video_id = request.video_id.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            let stderr = stderr_tail.await.unwrap_or_default();
            let outcome = match status {
                Ok(status) if status.success() => {
                    debug!("yt-dlp finished streaming {video_id}");
                    Ok(())
                }
                Ok(status) => {
                    debug!("yt-dlp exited with {status} for {video_id}");
                    Err(FetchError::Failed(run_error_message(&stderr)))
                }
                Err(error) => Err(FetchError::Io(error)),
            };
            if finished_tx.send(outcome).is_err() {
                warn!("Nobody awaited the yt-dlp outcome for {video_id}");
            }
        });

        let filename = match &request.kind {
            MediaKind::Video { quality } => format!("{}-{quality}.{extension}", request.video_id),
            MediaKind::Audio => format!("{}.{extension}", request.video_id),
        };

        Ok(MediaStream {
            content_type: content_type_for_extension(extension),
            filename,
            reader: Box::new(std::io::Cursor::new(first_chunk).chain(stdout)),
            finished,
        })
    }
}

/// Keeps the pipe empty for the lifetime of the child and returns the last
/// `STDERR_TAIL_BYTES` it wrote.
fn drain_stderr(stderr: Option<ChildStderr>) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let Some(stderr) = stderr else {
            return tail;
        };
        read_tail(stderr, &mut tail).await;
        tail
    })
}

async fn read_tail(mut reader: impl AsyncRead + Unpin, tail: &mut Vec<u8>) {
    let mut chunk = [0; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                tail.extend_from_slice(&chunk[..read]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
}

fn spawn_error(error: std::io::Error) -> FetchError {
    if error.kind() == ErrorKind::NotFound {
        FetchError::NotInstalled
    } else {
        FetchError::Io(error)
    }
}

/// Single-file formats only; separate streams cannot be merged onto stdout.
fn format_selector(kind: &MediaKind) -> (String, &'static str) {
    match kind {
        MediaKind::Video { quality } => {
            let selector = match quality_height(quality) {
                Some(height) => format!(
                    "best[height<={height}][ext=mp4]/best[height<={height}]/best[ext=mp4]/best"
                ),
                None => "best[ext=mp4]/best".to_string(),
            };
            (selector, "mp4")
        }
        MediaKind::Audio => ("bestaudio[ext=m4a]/bestaudio".to_string(), "m4a"),
    }
}

fn quality_height(quality: &str) -> Option<u32> {
    quality
        .trim()
        .strip_suffix('p')
        .and_then(|height| height.parse::<u32>().ok())
        .filter(|height| *height > 0)
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the download")
        .to_string();
    let lower = message.to_ascii_lowercase();

    if lower.contains("unsupported url") {
        "Unsupported or invalid URL.".to_string()
    } else if lower.contains("video unavailable") || lower.contains("private video") {
        "This video is unavailable.".to_string()
    } else if lower.contains("max-filesize") || lower.contains("larger than max") {
        "The file exceeds the maximum allowed size.".to_string()
    } else {
        message
    }
}

pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "opus" | "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (hours, minutes, seconds) = (total / 3_600, (total % 3_600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_selector_caps_height() {
        let (selector, extension) = format_selector(&MediaKind::Video {
            quality: "720p".to_string(),
        });
        assert!(selector.starts_with("best[height<=720][ext=mp4]"));
        assert_eq!(extension, "mp4");

        let (selector, _) = format_selector(&MediaKind::Video {
            quality: "hd".to_string(),
        });
        assert_eq!(selector, "best[ext=mp4]/best");
    }

    #[test]
    fn audio_selector_prefers_m4a() {
        assert_eq!(
            format_selector(&MediaKind::Audio),
            ("bestaudio[ext=m4a]/bestaudio".to_string(), "m4a")
        );
    }

    #[test]
    fn parses_quality_heights() {
        assert_eq!(quality_height("1080p"), Some(1080));
        assert_eq!(quality_height(" 360p "), Some(360));
        assert_eq!(quality_height("0p"), None);
        assert_eq!(quality_height("best"), None);
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(59.6), "1:00");
        assert_eq!(format_duration(630.0), "10:30");
        assert_eq!(format_duration(3_725.0), "1:02:05");
    }

    #[test]
    fn error_message_uses_last_stderr_line() {
        let stderr = b"[youtube] abc: Downloading webpage\nERROR: [youtube] abc: Video unavailable\n\n";
        assert_eq!(run_error_message(stderr), "This video is unavailable.");
        assert_eq!(
            run_error_message(b"ERROR: something odd"),
            "ERROR: something odd"
        );
        assert_eq!(
            run_error_message(b""),
            "yt-dlp could not complete the download"
        );
    }

    #[tokio::test]
    async fn stderr_tail_is_bounded() {
        let mut noise = vec![b'.'; STDERR_TAIL_BYTES * 4];
        noise.extend_from_slice(b"\nERROR: Video unavailable\n");

        let mut tail = Vec::new();
        read_tail(noise.as_slice(), &mut tail).await;

        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
        assert_eq!(run_error_message(&tail), "This video is unavailable.");
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let fetcher = YtDlpFetcher::new("/nonexistent/yt-dlp-binary");
        let error = fetcher
            .probe("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::NotInstalled));
    }
}
