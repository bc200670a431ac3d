//! Execution unit → orchestrator messages.
//!
//! [`StatusMessage`] is the loosely-typed wire form: every field is
//! optional and unknown fields are ignored. [`JobStatus::decode`]
//! turns it into a closed tagged value for a given [`JobKind`]:
//! either [`Progress`] (forwarded to the caller) or [`Terminal`]
//! (ends the job).
//!
//! A message carrying `error` is terminal whatever its `status` says.
//! An unrecognized `status` string decodes to [`Progress::Other`] so a
//! newer unit can report stages this crate does not know about.

use serde::{Deserialize, Serialize};

use crate::protocol::JobKind;
use crate::transcript::Transcript;
use crate::types::MaskRef;

/// Raw status message as posted by the execution unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Lifecycle stage, e.g. `"loading"` or `"complete"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Generation of the job this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    /// Incremental text fragment while generating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence: Option<String>,
    /// Job result on `complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure reported by the unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Generation throughput reported with a completed text job.
    #[serde(
        default,
        rename = "tokensSec",
        skip_serializing_if = "Option::is_none"
    )]
    pub tokens_per_sec: Option<f64>,
    /// Wall time in milliseconds reported with a completed text job.
    #[serde(
        default,
        rename = "totalTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_time_ms: Option<f64>,
}

impl StatusMessage {
    /// A message with only a status string.
    #[must_use]
    pub fn status(status: &str) -> Self {
        Self {
            status: Some(status.to_owned()),
            ..Self::default()
        }
    }

    /// An error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Tag with a job generation.
    #[must_use]
    pub const fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Attach a text fragment.
    #[must_use]
    pub fn with_sentence(mut self, sentence: impl Into<String>) -> Self {
        self.sentence = Some(sentence.into());
        self
    }

    /// Attach an output payload.
    #[must_use]
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Parse the JSON text received from the execution unit.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `json` is not an object of the
    /// expected shape.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Whether this message ends its job, judged by the wire form
    /// alone: an `error`, or a `complete`, `completeEmbedding` or
    /// `aborted` status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.error.is_some()
            || matches!(
                self.status.as_deref(),
                Some("complete" | "completeEmbedding" | "complete-embedding" | "aborted")
            )
    }
}

/// A non-terminal stage, forwarded verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Waiting for the unit to pick the job up.
    Queued,
    /// Fetching and initializing model weights.
    Loading,
    /// Computing the image embedding.
    Embedding,
    /// Predicting a mask from points.
    Segmenting,
    /// Decoding audio.
    Decoding,
    /// Producing text; carries the next fragment when one is present.
    Generating(Option<String>),
    /// A stage this crate does not know by name.
    Other(String),
}

impl Progress {
    /// The status string as the unit sent it.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Loading => "loading",
            Self::Embedding => "embedding",
            Self::Segmenting => "segmenting",
            Self::Decoding => "decoding",
            Self::Generating(_) => "generating",
            Self::Other(s) => s,
        }
    }
}

/// The result of a completed text generation job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextOutput {
    /// Final text as reported by the unit.
    pub text: String,
    /// Tokens per second, if reported.
    pub tokens_per_sec: Option<f64>,
    /// Wall time in milliseconds, if reported.
    pub total_time_ms: Option<f64>,
}

/// The payload of a `complete` status, typed by job kind.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    /// Text generation result.
    Text(TextOutput),
    /// Point-query result.
    Mask(MaskRef),
    /// Transcription result.
    Transcript(Transcript),
}

/// A status that ends the job.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// The job finished with output.
    Complete(JobOutput),
    /// An embedding-only job finished.
    CompleteEmbedding,
    /// The unit acknowledged cancellation.
    Aborted,
    /// The unit reported an error.
    Failed(String),
}

/// A decoded status.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Non-terminal.
    Progress(Progress),
    /// Terminal.
    Terminal(Terminal),
}

/// A `complete` status whose payload does not match the job kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {label} output: {reason}", label = .kind.label())]
pub struct MalformedOutput {
    /// The job kind being decoded.
    pub kind: JobKind,
    /// What was wrong.
    pub reason: String,
}

impl JobStatus {
    /// Decode a raw message for a job of `kind`.
    ///
    /// Returns `Ok(None)` for a message with neither `status` nor
    /// `error`, which carries nothing actionable.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedOutput`] when a `complete` payload cannot be
    /// read as the output type of `kind`.
    pub fn decode(kind: JobKind, message: &StatusMessage) -> Result<Option<Self>, MalformedOutput> {
        if let Some(error) = &message.error {
            return Ok(Some(Self::Terminal(Terminal::Failed(error.clone()))));
        }
        let Some(status) = message.status.as_deref() else {
            return Ok(None);
        };
        let decoded = match status {
            "queued" => Self::Progress(Progress::Queued),
            "loading" => Self::Progress(Progress::Loading),
            "embedding" => Self::Progress(Progress::Embedding),
            "segmenting" => Self::Progress(Progress::Segmenting),
            "decoding" => Self::Progress(Progress::Decoding),
            "generating" => Self::Progress(Progress::Generating(message.sentence.clone())),
            "complete" => Self::Terminal(Terminal::Complete(decode_output(kind, message)?)),
            "completeEmbedding" | "complete-embedding" => {
                Self::Terminal(Terminal::CompleteEmbedding)
            }
            "aborted" => Self::Terminal(Terminal::Aborted),
            other => Self::Progress(Progress::Other(other.to_owned())),
        };
        Ok(Some(decoded))
    }
}

/// Shape of a point-query `output`.
#[derive(Deserialize)]
struct MaskPayload {
    #[serde(rename = "maskURL", alias = "maskUrl")]
    mask_url: String,
}

fn decode_output(kind: JobKind, message: &StatusMessage) -> Result<JobOutput, MalformedOutput> {
    let malformed = |reason: String| MalformedOutput { kind, reason };
    match kind {
        JobKind::TextGeneration => {
            let text = match &message.output {
                None | Some(serde_json::Value::Null) => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => return Err(malformed(format!("expected text, got {other}"))),
            };
            Ok(JobOutput::Text(TextOutput {
                text,
                tokens_per_sec: message.tokens_per_sec,
                total_time_ms: message.total_time_ms,
            }))
        }
        JobKind::Segmentation => {
            let output = message
                .output
                .clone()
                .ok_or_else(|| malformed("missing mask output".to_owned()))?;
            let payload: MaskPayload =
                serde_json::from_value(output).map_err(|e| malformed(e.to_string()))?;
            Ok(JobOutput::Mask(MaskRef::new(payload.mask_url)))
        }
        JobKind::Transcription => {
            let output = message
                .output
                .clone()
                .ok_or_else(|| malformed("missing transcript output".to_owned()))?;
            let transcript: Transcript =
                serde_json::from_value(output).map_err(|e| malformed(e.to_string()))?;
            Ok(JobOutput::Transcript(transcript))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode(kind: JobKind, json: &str) -> Option<JobStatus> {
        JobStatus::decode(kind, &StatusMessage::from_json(json).unwrap()).unwrap()
    }

    #[test]
    fn error_wins_over_status() {
        let status = decode(
            JobKind::TextGeneration,
            r#"{"status": "generating", "error": "out of memory"}"#,
        );
        assert_eq!(
            status,
            Some(JobStatus::Terminal(Terminal::Failed("out of memory".into())))
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let status = decode(
            JobKind::Segmentation,
            r#"{"status": "loading", "message": "Loading Model", "progress": 0.4}"#,
        );
        assert_eq!(status, Some(JobStatus::Progress(Progress::Loading)));
    }

    #[test]
    fn unknown_status_is_forwarded_as_other() {
        let status = decode(JobKind::Transcription, r#"{"status": "warming-up"}"#);
        assert_eq!(
            status,
            Some(JobStatus::Progress(Progress::Other("warming-up".into())))
        );
    }

    #[test]
    fn message_without_status_or_error_is_a_no_op() {
        assert_eq!(decode(JobKind::Segmentation, r#"{"generation": 2}"#), None);
    }

    #[test]
    fn terminal_is_judged_without_a_kind() {
        assert!(StatusMessage::status("aborted").is_terminal());
        assert!(StatusMessage::status("complete-embedding").is_terminal());
        assert!(StatusMessage::status("complete").is_terminal());
        assert!(StatusMessage::error("boom").is_terminal());
        assert!(!StatusMessage::status("generating").is_terminal());
        assert!(!StatusMessage::status("warming-up").is_terminal());
        assert!(!StatusMessage::default().is_terminal());
    }

    #[test]
    fn generating_carries_fragment() {
        let status = decode(
            JobKind::TextGeneration,
            r#"{"status": "generating", "sentence": " world"}"#,
        );
        assert_eq!(
            status,
            Some(JobStatus::Progress(Progress::Generating(Some(" world".into()))))
        );
    }

    #[test]
    fn both_embedding_spellings_are_terminal() {
        for spelling in ["completeEmbedding", "complete-embedding"] {
            let msg = StatusMessage::status(spelling);
            assert_eq!(
                JobStatus::decode(JobKind::Segmentation, &msg).unwrap(),
                Some(JobStatus::Terminal(Terminal::CompleteEmbedding))
            );
        }
    }

    #[test]
    fn segmentation_complete_yields_mask() {
        let msg = StatusMessage::status("complete").with_output(json!({"maskURL": "blob:m"}));
        assert_eq!(
            JobStatus::decode(JobKind::Segmentation, &msg).unwrap(),
            Some(JobStatus::Terminal(Terminal::Complete(JobOutput::Mask(
                MaskRef::new("blob:m")
            ))))
        );
    }

    #[test]
    fn segmentation_complete_without_mask_is_malformed() {
        let msg = StatusMessage::status("complete");
        let err = JobStatus::decode(JobKind::Segmentation, &msg).unwrap_err();
        assert_eq!(err.kind, JobKind::Segmentation);
        assert!(err.to_string().contains("Segmentation"));
    }

    #[test]
    fn text_complete_reads_timings() {
        let status = decode(
            JobKind::TextGeneration,
            r#"{"status": "complete", "output": "Hello world", "tokensSec": 12.5, "totalTime": 800}"#,
        );
        let Some(JobStatus::Terminal(Terminal::Complete(JobOutput::Text(out)))) = status else {
            unreachable!("expected text output, got {status:?}");
        };
        assert_eq!(out.text, "Hello world");
        assert_eq!(out.tokens_per_sec, Some(12.5));
        assert_eq!(out.total_time_ms, Some(800.0));
    }

    #[test]
    fn transcription_complete_yields_segments() {
        let msg = StatusMessage::status("complete").with_output(json!([
            {"start": 0.0, "duration": 2.0, "dr": {"text": " Hello", "avg_logprob": -0.2}},
            {"start": 2.0, "duration": 1.5, "dr": {"text": "there."}}
        ]));
        let Some(JobStatus::Terminal(Terminal::Complete(JobOutput::Transcript(t)))) =
            JobStatus::decode(JobKind::Transcription, &msg).unwrap()
        else {
            unreachable!("expected transcript");
        };
        assert_eq!(t.segments().len(), 2);
    }

    #[test]
    fn builders_serialize_sparse() {
        let msg = StatusMessage::status("aborted").with_generation(7);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"status":"aborted","generation":7}"#);
    }
}
