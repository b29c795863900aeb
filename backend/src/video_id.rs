use thiserror::Error;
use url::Url;

const VIDEO_ID_LEN: usize = 11;

const SUPPORTED_DOMAINS: [&str; 3] = ["youtube.com", "youtu.be", "youtube-nocookie.com"];

/// A validated YouTube URL and the video id it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef {
    pub url: String,
    pub video_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VideoUrlError {
    #[error("Please enter a YouTube URL.")]
    Empty,
    #[error("The URL could not be parsed.")]
    Malformed,
    #[error("Only YouTube URLs are supported.")]
    UnsupportedHost,
    #[error("The URL does not point at a YouTube video.")]
    MissingVideoId,
}

pub fn parse_video_url(input: &str) -> Result<VideoRef, VideoUrlError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(VideoUrlError::Empty);
    }

    let parsed = Url::parse(input).map_err(|_| VideoUrlError::Malformed)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(VideoUrlError::UnsupportedHost);
    }

    let host = parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or(VideoUrlError::UnsupportedHost)?;
    let domain = SUPPORTED_DOMAINS
        .iter()
        .find(|domain| host == **domain || host.ends_with(&format!(".{domain}")))
        .ok_or(VideoUrlError::UnsupportedHost)?;

    let candidate = if *domain == "youtu.be" {
        first_path_segment(&parsed)
    } else {
        video_id_from_youtube_path(&parsed)
    };

    let video_id = candidate
        .filter(|value| is_valid_video_id(value))
        .ok_or(VideoUrlError::MissingVideoId)?;

    Ok(VideoRef {
        url: input.to_string(),
        video_id,
    })
}

fn video_id_from_youtube_path(parsed: &Url) -> Option<String> {
    let mut segments = parsed.path_segments()?.filter(|segment| !segment.is_empty());
    match segments.next() {
        Some("watch") => parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned()),
        Some("shorts" | "embed" | "live" | "v") => segments.next().map(ToString::to_string),
        _ => None,
    }
}

fn first_path_segment(parsed: &Url) -> Option<String> {
    parsed
        .path_segments()?
        .find(|segment| !segment.is_empty())
        .map(ToString::to_string)
}

pub fn is_valid_video_id(value: &str) -> bool {
    value.len() == VIDEO_ID_LEN
        && value
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_'))
}
