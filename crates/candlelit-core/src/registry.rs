//! Static model tables.
//!
//! Entries are read-only metadata used to build [`JobRequest`]s; the
//! weights themselves are fetched by the execution unit.
//!
//! [`JobRequest`]: crate::protocol::JobRequest

use crate::protocol::{JobKind, ModelLocator};

/// One downloadable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelEntry {
    /// Identifier sent to the execution unit as `modelId`.
    pub id: &'static str,
    /// Which job kind this model serves.
    pub kind: JobKind,
    /// Human-readable name for the model picker.
    pub title: &'static str,
    /// Locator prefix shared by every file of the model.
    pub base: &'static str,
    /// Weight file, or ordered weight parts for split checkpoints.
    pub weights: &'static [&'static str],
    /// Tokenizer file, if the model needs one.
    pub tokenizer: Option<&'static str>,
    /// Model config file, if the model needs one.
    pub config: Option<&'static str>,
    /// Whether the weights are quantized.
    pub quantized: bool,
    /// Default maximum sequence length, for language models.
    pub seq_len: Option<u32>,
    /// Download size shown to the user.
    pub size: &'static str,
}

impl ModelEntry {
    /// Weight locator(s), each resolved against [`base`](Self::base).
    #[must_use]
    pub fn weights_locator(&self) -> ModelLocator {
        match self.weights {
            [single] => ModelLocator::Single(self.resolve(single)),
            parts => ModelLocator::Parts(parts.iter().map(|p| self.resolve(p)).collect()),
        }
    }

    /// Tokenizer locator, if any.
    #[must_use]
    pub fn tokenizer_locator(&self) -> Option<String> {
        self.tokenizer.map(|f| self.resolve(f))
    }

    /// Config locator, if any.
    #[must_use]
    pub fn config_locator(&self) -> Option<String> {
        self.config.map(|f| self.resolve(f))
    }

    fn resolve(&self, file: &str) -> String {
        format!("{}{file}", self.base)
    }
}

const PHI_BASE: &str = "https://huggingface.co/lmz/candle-quantized-phi/resolve/main/";
const SAM_BASE: &str = "https://huggingface.co/lmz/candle-sam/resolve/main/";
const WHISPER_QUANTIZED_BASE: &str = "https://huggingface.co/lmz/candle-whisper/resolve/main/";

/// Mel filter bank shared by every transcription model.
pub const MEL_FILTERS_URL: &str =
    "https://huggingface.co/spaces/lmz/candle-whisper/resolve/main/mel_filters.safetensors";

/// Text generation models.
pub const TEXT_MODELS: &[ModelEntry] = &[
    ModelEntry {
        id: "puffin_phi_v2_q4k",
        kind: JobKind::TextGeneration,
        title: "Puffin Phi v2 (q4k)",
        base: PHI_BASE,
        weights: &["model-puffin-phi-v2-q4k.gguf"],
        tokenizer: Some("tokenizer-puffin-phi-v2.json"),
        config: Some("puffin-phi-v2.json"),
        quantized: true,
        seq_len: Some(2048),
        size: "798 MB",
    },
    ModelEntry {
        id: "puffin_phi_v2_q80",
        kind: JobKind::TextGeneration,
        title: "Puffin Phi v2 (q80)",
        base: PHI_BASE,
        weights: &["model-puffin-phi-v2-q80.gguf"],
        tokenizer: Some("tokenizer-puffin-phi-v2.json"),
        config: Some("puffin-phi-v2.json"),
        quantized: true,
        seq_len: Some(2048),
        size: "1.50 GB",
    },
    ModelEntry {
        id: "phi_2_0_q4k",
        kind: JobKind::TextGeneration,
        title: "Phi 2 (q4k)",
        base: "https://huggingface.co/radames/phi-2-quantized/resolve/main/",
        weights: &[
            "model-v2-q4k.gguf_aa.part",
            "model-v2-q4k.gguf_ab.part",
            "model-v2-q4k.gguf_ac.part",
        ],
        tokenizer: Some("tokenizer.json"),
        config: Some("config.json"),
        quantized: true,
        seq_len: Some(2048),
        size: "1.57 GB",
    },
];

/// Promptable segmentation models.
pub const SEGMENTATION_MODELS: &[ModelEntry] = &[
    ModelEntry {
        id: "sam_mobile_tiny",
        kind: JobKind::Segmentation,
        title: "Mobile SAM Tiny",
        base: SAM_BASE,
        weights: &["mobile_sam-tiny-vitt.safetensors"],
        tokenizer: None,
        config: None,
        quantized: false,
        seq_len: None,
        size: "40.6 MB",
    },
    ModelEntry {
        id: "sam_base",
        kind: JobKind::Segmentation,
        title: "SAM Base",
        base: SAM_BASE,
        weights: &["sam_vit_b_01ec64.safetensors"],
        tokenizer: None,
        config: None,
        quantized: false,
        seq_len: None,
        size: "375 MB",
    },
];

/// Speech transcription models.
pub const TRANSCRIPTION_MODELS: &[ModelEntry] = &[
    ModelEntry {
        id: "tiny_multilingual",
        kind: JobKind::Transcription,
        title: "Tiny Multilingual",
        base: "https://huggingface.co/openai/whisper-tiny/resolve/main/",
        weights: &["model.safetensors"],
        tokenizer: Some("tokenizer.json"),
        config: Some("config.json"),
        quantized: false,
        seq_len: None,
        size: "151 MB",
    },
    ModelEntry {
        id: "tiny_en",
        kind: JobKind::Transcription,
        title: "Tiny English",
        base: "https://huggingface.co/openai/whisper-tiny.en/resolve/main/",
        weights: &["model.safetensors"],
        tokenizer: Some("tokenizer.json"),
        config: Some("config.json"),
        quantized: false,
        seq_len: None,
        size: "151 MB",
    },
    ModelEntry {
        id: "tiny_quantized_multilingual_q80",
        kind: JobKind::Transcription,
        title: "Quantized Tiny Multilingual",
        base: WHISPER_QUANTIZED_BASE,
        weights: &["model-tiny-q80.gguf"],
        tokenizer: Some("tokenizer-tiny.json"),
        config: Some("config-tiny.json"),
        quantized: true,
        seq_len: None,
        size: "41.5 MB",
    },
    ModelEntry {
        id: "tiny_en_quantized_q80",
        kind: JobKind::Transcription,
        title: "Quantized Tiny English",
        base: WHISPER_QUANTIZED_BASE,
        weights: &["model-tiny-q80.gguf"],
        tokenizer: Some("tokenizer-tiny-en.json"),
        config: Some("config-tiny-en.json"),
        quantized: true,
        seq_len: None,
        size: "41.8 MB",
    },
    ModelEntry {
        id: "distil_medium_en",
        kind: JobKind::Transcription,
        title: "Distil Medium English",
        base: "https://huggingface.co/distil-whisper/distil-medium.en/resolve/main/",
        weights: &["model.safetensors"],
        tokenizer: Some("tokenizer.json"),
        config: Some("config.json"),
        quantized: false,
        seq_len: None,
        size: "789 MB",
    },
];

/// All models serving `kind`, default first.
#[must_use]
pub const fn models(kind: JobKind) -> &'static [ModelEntry] {
    match kind {
        JobKind::TextGeneration => TEXT_MODELS,
        JobKind::Segmentation => SEGMENTATION_MODELS,
        JobKind::Transcription => TRANSCRIPTION_MODELS,
    }
}

/// The model selected before the user picks one.
#[must_use]
pub const fn default_model(kind: JobKind) -> &'static ModelEntry {
    &models(kind)[0]
}

/// Look up a model by kind and id.
#[must_use]
pub fn lookup(kind: JobKind, id: &str) -> Option<&'static ModelEntry> {
    models(kind).iter().find(|m| m.id == id)
}
