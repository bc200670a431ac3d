//! Transcription output.
//!
//! The execution unit returns one entry per decoded audio window:
//!
//! ```json
//! [{"start": 0.0, "duration": 30.0, "dr": {"text": "…", "avg_logprob": -0.3}}]
//! ```
//!
//! Only the timing and text are kept; the rest of the decoding result
//! is ignored.

use serde::{Deserialize, Serialize};

/// One decoded window of audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireSegment", into = "WireSegment")]
pub struct TranscriptSegment {
    /// Window start in seconds.
    pub start: f64,
    /// Window length in seconds.
    pub duration: f64,
    /// Decoded text.
    pub text: String,
}

#[derive(Clone, Serialize, Deserialize)]
struct WireSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    duration: f64,
    dr: DecodingResult,
}

#[derive(Clone, Serialize, Deserialize)]
struct DecodingResult {
    text: String,
}

impl From<WireSegment> for TranscriptSegment {
    fn from(w: WireSegment) -> Self {
        Self {
            start: w.start,
            duration: w.duration,
            text: w.dr.text,
        }
    }
}

impl From<TranscriptSegment> for WireSegment {
    fn from(s: TranscriptSegment) -> Self {
        Self {
            start: s.start,
            duration: s.duration,
            dr: DecodingResult { text: s.text },
        }
    }
}

/// A full transcription: segments in audio order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript(Vec<TranscriptSegment>);

impl Transcript {
    /// Wrap decoded segments.
    #[must_use]
    pub const fn new(segments: Vec<TranscriptSegment>) -> Self {
        Self(segments)
    }

    /// The segments.
    #[must_use]
    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.0
    }

    /// Segment texts joined with a single space.
    #[must_use]
    pub fn text(&self) -> String {
        self.0
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// End of the last segment in seconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.0.last().map_or(0.0, |s| s.start + s.duration)
    }
}
