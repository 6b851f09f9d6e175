#![forbid(unsafe_code)]

//! YouTube URL handling for the watch flow.
//!
//! The frontend hands over whatever the user pasted into the URL field; this
//! module pulls the video id out of it and builds the player link the embedded
//! web view loads. Parsing is a single compiled pattern so the set of accepted
//! URL shapes lives in exactly one place.

use std::sync::LazyLock;

use regex::Regex;

/// Markers that precede a video id in the URL shapes we accept, including the
/// percent-encoded forms that show up when a watch link is itself passed as a
/// query parameter. The id is everything after the first marker up to the next
/// `#`, `&`, `?`, or newline.
static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:watch\?v=|/videos/|embed/|youtu\.be/|/v/|/e/",
        r"|watch\?v%3D|watch\?feature=player_embedded&v=",
        r"|%2Fvideos%2F|embed%2F|youtu\.be%2F|%2Fv%2F)",
        r"([^#&?\n]*)",
    ))
    .expect("video id pattern compiles")
});

/// Extracts the video id from a pasted YouTube URL.
///
/// Returns `None` for empty or whitespace-only input and for strings that
/// contain none of the known markers. The extracted id is not length-checked,
/// and a marker sitting directly before a delimiter (for example a bare
/// `https://youtu.be/`) yields an empty id; callers that need a playable id
/// must treat that as invalid.
pub fn extract_video_id(input: &str) -> Option<String> {
    if input.trim().is_empty() {
        return None;
    }

    VIDEO_ID_RE
        .captures(input)
        .map(|captures| captures[1].to_string())
}

/// Builds the player URL loaded into the embedded web view.
pub fn embed_url(video_id: &str) -> String {
    format!("https://www.youtube.com/embed/{video_id}")
}
