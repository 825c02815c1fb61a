//! Normalization applied to every source payload before it leaves the
//! gateway, regardless of which resolution stage produced it.

use crate::models::{EpisodeRecord, EpisodeSources};

/// Canonical quality marker for adaptive streams.
pub const AUTO_QUALITY: &str = "AUTO";

/// Normalize a source payload in place: coerce adaptive quality labels and
/// drop thumbnail pseudo-subtitles.
pub fn normalize_sources(payload: &mut EpisodeSources) {
    for source in &mut payload.sources {
        let is_auto = match source.quality.as_deref() {
            None => true,
            Some(q) => q.eq_ignore_ascii_case("auto"),
        };
        if is_auto {
            source.quality = Some(AUTO_QUALITY.to_string());
        }
    }

    payload
        .subtitles
        .retain(|track| !track.lang.eq_ignore_ascii_case("thumbnails"));
}

/// Mark an episode id as carrying both sub and dub streams. Already-marked
/// ids pass through unchanged, so applying this twice is a no-op.
pub fn mark_both(id: &str) -> String {
    if id.ends_with("$both") {
        id.to_string()
    } else {
        format!("{id}$both")
    }
}

/// Apply [`mark_both`] across a whole episode list.
pub fn mark_episodes_both(episodes: &mut [EpisodeRecord]) {
    for episode in episodes {
        episode.id = mark_both(&episode.id);
        if let Some(alt) = &episode.id_alt {
            episode.id_alt = Some(mark_both(alt));
        }
    }
}
