/// Media references embedded in message text
///
/// Media replies arrive as plain text: a marker line (`📷 Images:`,
/// `🎥 Video:`, `📎 Attachments:` ...) followed by URLs, or URLs mixed into
/// ordinary text. This module pulls them out and classifies them.
use serde::Serialize;

const IMAGES_MARKER: &str = "📷 Images:";
const IMAGE_MARKER: &str = "📷 Image:";
const VIDEO_MARKER: &str = "🎥 Video:";
const VIDEOS_MARKER: &str = "🎥 Videos:";
const ATTACHMENTS_MARKER: &str = "📎 Attachments:";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi", "mkv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaItem {
    pub url: String,
    pub kind: MediaKind,
}

/// Media view of one message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedBody {
    pub items: Vec<MediaItem>,
    /// Remaining prose; empty when the body was only media
    pub text: String,
}

/// Split a message body into media items and display text. Relative
/// `/uploads/` paths are resolved against the origin of `api_base`.
pub fn parse(body: &str, api_base: &str) -> ParsedBody {
    let items = categorize(body)
        .into_iter()
        .map(|item| MediaItem {
            url: normalize_url(&item.url, api_base),
            kind: item.kind,
        })
        .collect();
    ParsedBody {
        items,
        text: display_text(body),
    }
}

pub fn normalize_url(url: &str, api_base: &str) -> String {
    if !url.starts_with("/uploads/") {
        return url.to_string();
    }
    match origin(api_base) {
        Some(origin) => format!("{}{}", origin, url),
        None => url.to_string(),
    }
}

/// `scheme://host[:port]` of an absolute URL
fn origin(url: &str) -> Option<&str> {
    let scheme_end = url.find("://")? + 3;
    let host_end = url[scheme_end..]
        .find('/')
        .map_or(url.len(), |idx| scheme_end + idx);
    Some(&url[..host_end])
}

/// Every URL referenced by `text`, in order of appearance
pub fn extract_urls(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    // Multi-line markers list one or more URLs per following line
    for marker in [IMAGES_MARKER, VIDEOS_MARKER, ATTACHMENTS_MARKER] {
        if text.starts_with(marker) {
            return text.lines().skip(1).flat_map(split_urls).collect();
        }
    }
    if let Some((_, rest)) = text.split_once(IMAGE_MARKER) {
        return split_urls(rest.trim());
    }
    if let Some(rest) = text.strip_prefix(VIDEO_MARKER) {
        return split_urls(rest.trim());
    }

    text.split_whitespace()
        .filter_map(url_start)
        .flat_map(split_urls)
        .collect()
}

/// Image and video items referenced by `text`; other URLs are ignored
pub fn categorize(text: &str) -> Vec<MediaItem> {
    extract_urls(text)
        .into_iter()
        .filter_map(|url| {
            let kind = if is_video_url(&url) {
                MediaKind::Video
            } else if is_image_url(&url) {
                MediaKind::Image
            } else {
                return None;
            };
            Some(MediaItem { url, kind })
        })
        .collect()
}

/// Text to show in the bubble once media has been pulled out
pub fn display_text(text: &str) -> String {
    let has_media = !categorize(text).is_empty();
    let bare_marker = [IMAGES_MARKER, VIDEO_MARKER, VIDEOS_MARKER, ATTACHMENTS_MARKER]
        .iter()
        .any(|m| text.starts_with(m));
    if bare_marker {
        return String::new();
    }
    let shown = match text.split_once(IMAGE_MARKER) {
        Some((before, _)) => before.trim(),
        None => text,
    };
    if !has_media || shown.is_empty() || extract_urls(shown).is_empty() {
        return shown.to_string();
    }

    // Mostly-URL bodies (forwarded media) collapse to whatever prose is left
    let prose = shown
        .split_whitespace()
        .filter(|token| url_start(token).is_none())
        .collect::<Vec<_>>()
        .join(" ")
        .replace("()", "");
    prose
        .split(|c: char| matches!(c, ':' | '-' | '–' | '—' | '•'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_image_url(url: &str) -> bool {
    if url.contains("fbcdn.net") || url.contains("scontent") || url.contains("/uploads/") {
        return true;
    }
    has_extension(url, IMAGE_EXTENSIONS)
}

pub fn is_video_url(url: &str) -> bool {
    has_extension(url, VIDEO_EXTENSIONS)
}

/// Extension check on the path, ignoring any query string
fn has_extension(url: &str, extensions: &[&str]) -> bool {
    let path = url.split('?').next().unwrap_or(url);
    match path.rsplit_once('.') {
        Some((_, ext)) => extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)),
        None => false,
    }
}

/// Slice of `token` starting at an absolute URL or an uploads path
fn url_start(token: &str) -> Option<&str> {
    ["https://", "http://", "/uploads/"]
        .iter()
        .filter_map(|prefix| token.find(prefix))
        .min()
        .map(|idx| &token[idx..])
}

/// Some payloads join several URLs with commas
fn split_urls(segment: &str) -> Vec<String> {
    segment
        .split(',')
        .map(sanitize)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Strip quotes, brackets and trailing punctuation around a URL
fn sanitize(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(|c| matches!(c, '"' | '\'' | '(' | '['))
        .trim_end_matches(|c| matches!(c, ']' | ')' | '"' | '\'' | ',' | '.'))
        .to_string()
}
