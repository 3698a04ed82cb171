//! # Kornia Caption
//!
//! Image captioning with a pretrained vision-language model (BLIP).
//!
//! The crate is organized as a small pipeline:
//!
//! - [`source`]: classifies a raw input as a local path or a remote url and decodes it
//!   into an rgb8 image.
//! - [`model`]: loads the model once and binds it to the fastest available device.
//! - [`caption`]: runs beam search over the model and returns clean text.
//! - [`pipeline`]: single image, batch/demo and interactive drivers with per-item
//!   failure isolation.
//!
//! # Example
//!
//! ```no_run
//! use kornia_caption::{BlipModel, Captioner, ModelConfig, ReportFormat, Reporter, Resolver};
//! use std::sync::atomic::AtomicBool;
//!
//! let model = BlipModel::load(&ModelConfig::default())?;
//! let mut captioner = Captioner::new(model, Resolver::http()?);
//! let mut reporter = Reporter::stdout(ReportFormat::Text);
//!
//! let cancel = AtomicBool::new(false);
//! let report = captioner.run_single("images/dog.jpg", &mut reporter, &cancel);
//! println!("{:?}", report.result.text());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Caption generation: decoding configuration, beam search and text cleanup.
pub mod caption;

/// Error taxonomy shared by every stage.
pub mod error;

/// The captioning model capability and its BLIP implementation.
pub mod model;

/// Run drivers composing the resolver and the generator.
pub mod pipeline;

/// Operator input for the interactive mode.
pub mod prompt;

/// Operator facing output.
pub mod report;

/// Input selection for the demo and list modes.
pub mod samples;

/// Image acquisition from local paths and urls.
pub mod source;

pub use caption::{GenerationConfig, generate};
pub use error::{CaptionError, ErrorKind, ModelLoadError};
pub use model::{BlipModel, CaptionModel, ModelConfig};
pub use pipeline::{
    BatchReport, CaptionResult, Captioner, InteractiveSummary, ItemState, LoopExit, RunStatus,
    SingleReport,
};
pub use prompt::{
    ChannelPrompt, InputCommand, PromptEvent, PromptSource, ScriptedPrompt, StdinPrompt,
};
pub use report::{ReportFormat, Reporter};
pub use source::{DecodedImage, Fetcher, HttpFetcher, ImageSource, Resolver};
