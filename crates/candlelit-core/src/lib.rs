//! candlelit-core: Job orchestration for browser inference workers (sans-IO).
//!
//! Drives three kinds of jobs on isolated execution units: streaming
//! text generation, point-prompted image segmentation, and audio
//! transcription. The pieces, leaves first:
//!
//! - [`channel`]: the [`TaskChannel`] seam to one execution unit
//! - [`protocol`] / [`status`]: the JSON messages crossing it
//! - [`controller`]: one-job-at-a-time futures over a channel
//! - [`segment`] / [`embedding`]: the point-prompt state machine
//! - [`composite`]: mask overlay and cut-out
//! - [`session`]: the above wired together per job kind
//!
//! This crate has **no I/O dependencies**. It never touches the DOM or
//! a real worker; `candlelit-io` provides the browser channel and
//! pixel plumbing.

pub mod channel;
pub mod chat;
pub mod composite;
pub mod config;
pub mod controller;
pub mod embedding;
pub mod points;
pub mod protocol;
pub mod registry;
pub mod segment;
pub mod session;
pub mod status;
pub mod transcript;
pub mod types;

pub use channel::{ChannelError, MemoryChannel, MessageHandler, TaskChannel};
pub use chat::{Conversation, Message, Role};
pub use composite::{CompositeError, Mask, cutout, overlay};
pub use config::{GenerationParams, SegmenterConfig};
pub use controller::{JobController, JobError, JobHandle, JobOutcome};
pub use embedding::{EmbeddingCache, EmbeddingKey, EmbeddingState};
pub use points::{ClickEvent, Point, PointChange, PointMode, PointSet};
pub use protocol::{Command, JobKind, JobRequest, ModelLocator, ParamValue};
pub use registry::{ModelEntry, default_model, lookup, models};
pub use segment::{ClickEffect, EmbeddingJob, PointQuery, Segmenter};
pub use session::{ChatSession, SegmentUpdate, SegmentationSession, random_seed, transcribe};
pub use status::{JobOutput, JobStatus, MalformedOutput, Progress, StatusMessage, TextOutput};
pub use transcript::{Transcript, TranscriptSegment};
pub use types::{Color, Dimensions, MaskRef, RgbaImage};
