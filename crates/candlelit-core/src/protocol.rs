//! Orchestrator → execution unit messages.
//!
//! Every job starts with one [`Command::Start`] carrying an immutable
//! [`JobRequest`] and the controller's generation counter. The unit
//! echoes the generation on each status so the orchestrator can tell a
//! superseded job's late messages from the current job's.
//!
//! Cancellation is the single-field [`Command::Abort`]; no
//! acknowledgment is awaited.
//!
//! Wire shape of a start command:
//!
//! ```json
//! {
//!   "command": "start",
//!   "generation": 3,
//!   "jobKind": "segmentation",
//!   "modelLocator": "https://…/mobile_sam-tiny-vitt.safetensors",
//!   "modelId": "sam_mobile_tiny",
//!   "auxiliaryLocators": {},
//!   "inputLocator": "blob:…",
//!   "parameters": {},
//!   "points": [[0.5, 0.5, true]]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::GenerationParams;
use crate::points::PointSet;
use crate::registry::{MEL_FILTERS_URL, ModelEntry};

/// The three job kinds an execution unit can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Streaming language-model text generation.
    TextGeneration,
    /// Image embedding and point-prompted mask prediction.
    Segmentation,
    /// Speech-to-text.
    Transcription,
}

impl JobKind {
    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::TextGeneration => "Text generation",
            Self::Segmentation => "Segmentation",
            Self::Transcription => "Transcription",
        }
    }
}

/// Where the execution unit fetches weights from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelLocator {
    /// One weight file.
    Single(String),
    /// Ordered parts of a split checkpoint, concatenated by the unit.
    Parts(Vec<String>),
}

/// A job parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A flag such as `quantized`.
    Bool(bool),
    /// A numeric knob such as `temp`.
    Number(f64),
    /// Free text such as the prompt.
    Text(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// An immutable description of one unit of work.
///
/// Built through the per-kind constructors; there are no setters, so a
/// request cannot change after it has been handed to a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    job_kind: JobKind,
    model_locator: ModelLocator,
    model_id: String,
    auxiliary_locators: BTreeMap<String, String>,
    input_locator: String,
    parameters: BTreeMap<String, ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    points: Option<PointSet>,
}

impl JobRequest {
    fn for_model(model: &ModelEntry, input_locator: impl Into<String>) -> Self {
        let mut auxiliary_locators = BTreeMap::new();
        if let Some(tokenizer) = model.tokenizer_locator() {
            auxiliary_locators.insert("tokenizer".to_owned(), tokenizer);
        }
        if let Some(config) = model.config_locator() {
            auxiliary_locators.insert("config".to_owned(), config);
        }
        Self {
            job_kind: model.kind,
            model_locator: model.weights_locator(),
            model_id: model.id.to_owned(),
            auxiliary_locators,
            input_locator: input_locator.into(),
            parameters: BTreeMap::new(),
            points: None,
        }
    }

    /// A text generation request for `prompt`.
    ///
    /// The prompt travels as the input locator so every job kind keeps
    /// the same shape.
    #[must_use]
    pub fn text_generation(
        model: &ModelEntry,
        prompt: &str,
        params: &GenerationParams,
        seed: u64,
    ) -> Self {
        let mut request = Self::for_model(model, prompt);
        #[allow(clippy::cast_precision_loss)] // seeds stay below 2^53
        let seed = seed as f64;
        request.parameters = BTreeMap::from([
            ("quantized".to_owned(), model.quantized.into()),
            ("temp".to_owned(), params.temperature.into()),
            ("top_p".to_owned(), params.top_p.into()),
            ("repeatPenalty".to_owned(), params.repeat_penalty.into()),
            ("seed".to_owned(), seed.into()),
            ("maxSeqLen".to_owned(), params.max_seq_len.into()),
        ]);
        request
    }

    /// An embedding-only segmentation request: no points.
    #[must_use]
    pub fn embedding(model: &ModelEntry, image_locator: &str) -> Self {
        Self::for_model(model, image_locator)
    }

    /// A point-query against the embedding of `image_locator`.
    ///
    /// Returns `None` for an empty point set: an empty query is
    /// undefined and must never reach the execution unit.
    #[must_use]
    pub fn point_query(model: &ModelEntry, image_locator: &str, points: &PointSet) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut request = Self::for_model(model, image_locator);
        request.points = Some(points.clone());
        Some(request)
    }

    /// A transcription request for the audio at `audio_locator`.
    #[must_use]
    pub fn transcription(model: &ModelEntry, audio_locator: &str) -> Self {
        let mut request = Self::for_model(model, audio_locator);
        request
            .auxiliary_locators
            .insert("melFilters".to_owned(), MEL_FILTERS_URL.to_owned());
        request
    }

    /// The job kind.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.job_kind
    }

    /// Weight locator(s).
    #[must_use]
    pub const fn model_locator(&self) -> &ModelLocator {
        &self.model_locator
    }

    /// Model identifier.
    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Tokenizer, config, mel filters and similar side files.
    #[must_use]
    pub const fn auxiliary_locators(&self) -> &BTreeMap<String, String> {
        &self.auxiliary_locators
    }

    /// The image, audio, or prompt the job runs on.
    #[must_use]
    pub fn input_locator(&self) -> &str {
        &self.input_locator
    }

    /// Job-specific parameters.
    #[must_use]
    pub const fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    /// Prompt points, present only on point-queries.
    #[must_use]
    pub const fn points(&self) -> Option<&PointSet> {
        self.points.as_ref()
    }

    /// `true` for a segmentation request without points.
    #[must_use]
    pub const fn is_embedding_only(&self) -> bool {
        matches!(self.job_kind, JobKind::Segmentation) && self.points.is_none()
    }
}

/// A command posted to the execution unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Start a job.
    Start {
        /// Controller generation, echoed back on every status.
        generation: u64,
        /// The job itself.
        #[serde(flatten)]
        request: JobRequest,
    },
    /// Best-effort cancellation of whatever the unit is running.
    Abort,
}

impl Command {
    /// Serialize to the JSON text posted to the execution unit.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if a parameter cannot be
    /// represented (e.g. a non-finite number).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
