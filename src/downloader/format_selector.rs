// FormatSelector - maps a media kind + quality label to a format constraint
//
// Labels are the ones offered to the user:
// - Video: 2160p (4K) down to 144p, selected by maximum height
// - Audio: 320kbps down to 128kbps, selected by maximum bitrate
//
// Only the leading numeric token matters ("1080p (Full HD)" -> 1080).

use serde::{Deserialize, Serialize};

use super::errors::{DownloadError, Result};
use super::models::{FormatConstraint, MediaKind};

/// Heights offered for video downloads, best first
pub const VIDEO_HEIGHTS: [u32; 8] = [2160, 1440, 1080, 720, 480, 360, 240, 144];

/// Bitrates offered for audio downloads, best first
pub const AUDIO_BITRATES: [u32; 4] = [320, 256, 192, 128];

/// Quality option for UI display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityOption {
    /// Display label (e.g., "1080p (Full HD)")
    pub label: String,

    /// Numeric value the label selects (height or kbps)
    pub value: u32,

    /// Whether this is preselected for the media kind
    pub is_default: bool,
}

pub struct FormatSelector;

impl FormatSelector {
    /// Build the constraint for a user choice.
    ///
    /// Fails with `InvalidQuality` when the label does not parse or names a
    /// value not offered for `kind`.
    pub fn select(kind: MediaKind, quality_label: &str) -> Result<FormatConstraint> {
        let invalid = || DownloadError::InvalidQuality {
            kind,
            label: quality_label.to_string(),
        };

        let value = Self::parse_label(kind, quality_label).ok_or_else(invalid)?;

        match kind {
            MediaKind::Video if VIDEO_HEIGHTS.contains(&value) => Ok(FormatConstraint::video(value)),
            MediaKind::Audio if AUDIO_BITRATES.contains(&value) => Ok(FormatConstraint::audio(value)),
            _ => Err(invalid()),
        }
    }

    /// Leading numeric token of the label, with the unit suffix for `kind`
    /// allowed ("720p", "192kbps", "192").
    fn parse_label(kind: MediaKind, label: &str) -> Option<u32> {
        let token = label.split_whitespace().next()?;
        let digits_end = token
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(token.len());
        if digits_end == 0 {
            return None;
        }

        let (digits, suffix) = token.split_at(digits_end);
        let suffix_ok = match kind {
            MediaKind::Video => suffix.is_empty() || suffix.eq_ignore_ascii_case("p"),
            MediaKind::Audio => {
                suffix.is_empty() || suffix.eq_ignore_ascii_case("kbps") || suffix.eq_ignore_ascii_case("k")
            }
        };
        if !suffix_ok {
            return None;
        }

        digits.parse().ok()
    }

    /// Labels offered for a media kind, best first
    pub fn quality_options(kind: MediaKind) -> Vec<QualityOption> {
        match kind {
            MediaKind::Video => VIDEO_HEIGHTS
                .iter()
                .map(|&h| QualityOption {
                    label: match h {
                        2160 => "2160p (4K)".to_string(),
                        1440 => "1440p (2K)".to_string(),
                        1080 => "1080p (Full HD)".to_string(),
                        720 => "720p (HD)".to_string(),
                        _ => format!("{}p", h),
                    },
                    value: h,
                    is_default: h == 1080,
                })
                .collect(),
            MediaKind::Audio => AUDIO_BITRATES
                .iter()
                .map(|&kbps| QualityOption {
                    label: match kbps {
                        320 => "320kbps (High)".to_string(),
                        256 => "256kbps (Good)".to_string(),
                        192 => "192kbps (Medium)".to_string(),
                        _ => "128kbps (Low)".to_string(),
                    },
                    value: kbps,
                    is_default: kbps == 320,
                })
                .collect(),
        }
    }

    /// Label preselected for a media kind
    pub fn default_label(kind: MediaKind) -> &'static str {
        match kind {
            MediaKind::Video => "1080p",
            MediaKind::Audio => "320kbps",
        }
    }

    /// Get format spec for yt-dlp from a constraint
    pub fn get_format_spec(constraint: &FormatConstraint) -> String {
        match (constraint.video_max_height_px, constraint.audio_max_bitrate_kbps) {
            (Some(h), _) => format!(
                "bestvideo[height<={h}]+bestaudio/best[height<={h}]/bestvideo+bestaudio/best"
            ),
            (None, Some(kbps)) => format!("bestaudio[abr<={kbps}]/bestaudio/best"),
            (None, None) => "bestvideo+bestaudio/best".to_string(),
        }
    }
}
