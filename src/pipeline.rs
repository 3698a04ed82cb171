use std::{
    io::Write,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
    caption::{GenerationConfig, generate},
    error::{CaptionError, ErrorKind},
    model::CaptionModel,
    prompt::{InputCommand, PromptEvent, PromptSource},
    report::Reporter,
    samples::demo_inputs,
    source::{Fetcher, HttpFetcher, ImageSource, Resolver},
};

const INTERACTIVE_PROMPT: &str = "📁 Enter image file path or URL: ";

/// Per-item progress through the captioning pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemState {
    /// The input was accepted but nothing ran yet.
    Pending,
    /// Reading the file or downloading the url.
    Resolving,
    /// The image could not be acquired or decoded.
    ResolveFailed,
    /// A decoded image is ready for the model.
    Resolved,
    /// The model is producing the caption.
    Generating,
    /// The model failed on a decoded image.
    GenerateFailed,
    /// A caption was produced.
    Captioned,
}

impl ItemState {
    /// Returns the state as a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Resolving => "resolving",
            ItemState::ResolveFailed => "resolve_failed",
            ItemState::Resolved => "resolved",
            ItemState::Generating => "generating",
            ItemState::GenerateFailed => "generate_failed",
            ItemState::Captioned => "captioned",
        }
    }

    /// Whether the item can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::ResolveFailed | ItemState::GenerateFailed | ItemState::Captioned
        )
    }
}

/// Outcome of one caption attempt. Exactly one of `text` and `error` is set.
#[derive(Clone, Debug, Serialize)]
pub struct CaptionResult {
    source: ImageSource,
    text: Option<String>,
    error: Option<ErrorKind>,
    message: Option<String>,
    elapsed_ms: u64,
}

impl CaptionResult {
    /// Creates a successful result.
    pub fn captioned(source: ImageSource, text: String, elapsed: Duration) -> Self {
        Self {
            source,
            text: Some(text),
            error: None,
            message: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Creates a failed result from the error that stopped the item.
    pub fn failed(source: ImageSource, error: &CaptionError, elapsed: Duration) -> Self {
        Self {
            source,
            text: None,
            error: Some(error.kind()),
            message: Some(error.to_string()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// The classified input.
    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    /// The caption, if the item was captioned.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The kind of failure, if the item failed.
    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    /// Human-readable reason of the failure.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Wall time spent on the item, resolution included.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Returns true if the item ended with a caption.
    pub fn is_captioned(&self) -> bool {
        self.text.is_some()
    }

    /// The terminal state the item ended in.
    pub fn state(&self) -> ItemState {
        match self.error {
            None => ItemState::Captioned,
            Some(kind) if kind.is_resolve_failure() => ItemState::ResolveFailed,
            Some(_) => ItemState::GenerateFailed,
        }
    }
}

/// How a whole run ended, used for the process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// The run did what was asked.
    Succeeded,
    /// No usable result came out of the run.
    Failed,
    /// The operator cancelled the run. Not an error.
    Interrupted,
}

/// Outcome of a single-image run.
#[derive(Clone, Debug)]
pub struct SingleReport {
    pub result: CaptionResult,
    /// A cancellation arrived while the image was being captioned.
    pub interrupted: bool,
}

impl SingleReport {
    pub fn status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Interrupted
        } else if self.result.is_captioned() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        }
    }
}

/// Results of a batch or demo run, in input order.
#[derive(Clone, Debug, Default)]
pub struct BatchReport {
    pub results: Vec<CaptionResult>,
    /// The run stopped early on a cancellation.
    pub interrupted: bool,
}

impl BatchReport {
    pub fn captioned(&self) -> usize {
        self.results.iter().filter(|r| r.is_captioned()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.captioned()
    }

    /// A batch succeeds when at least one of its images could be acquired.
    pub fn is_success(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.state() != ItemState::ResolveFailed)
    }

    /// A cancelled run is reported as interrupted whatever its partial results.
    pub fn status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Interrupted
        } else if self.is_success() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        }
    }
}

/// Why the interactive loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The operator typed a quit command.
    Quit,
    /// The input stream ended.
    Closed,
    /// The operator cancelled.
    Interrupted,
}

/// Everything an interactive session produced.
#[derive(Clone, Debug)]
pub struct InteractiveSummary {
    pub results: Vec<CaptionResult>,
    /// Empty inputs that were rejected without a caption attempt.
    pub rejected_inputs: usize,
    pub exit: LoopExit,
}

/// Runs the resolve then generate pipeline for one session.
///
/// Owns the model for the whole session: it is loaded once by the caller and every
/// caption reuses it. Items are processed one after another, and a failed item is
/// recorded without stopping the run.
pub struct Captioner<M: CaptionModel, F: Fetcher = HttpFetcher> {
    model: M,
    resolver: Resolver<F>,
    config: GenerationConfig,
}

impl<M: CaptionModel, F: Fetcher> Captioner<M, F> {
    pub fn new(model: M, resolver: Resolver<F>) -> Self {
        log::debug!("Captioning on {}", model.device_name());
        Self {
            model,
            resolver,
            config: GenerationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Resolves and captions one input. Never fails: errors end up in the result.
    pub fn caption(&mut self, input: &str) -> CaptionResult {
        let start_time = Instant::now();
        let source = ImageSource::classify(input);

        let mut state = ItemState::Pending;
        advance(&source, &mut state, ItemState::Resolving);

        let image = match self.resolver.resolve_source(&source) {
            Ok(image) => image,
            Err(e) => {
                advance(&source, &mut state, ItemState::ResolveFailed);
                log::warn!("Failed to load {source} ({}): {e}", e.kind().as_str());
                return CaptionResult::failed(source, &e, start_time.elapsed());
            }
        };

        advance(&source, &mut state, ItemState::Resolved);
        advance(&source, &mut state, ItemState::Generating);

        let result = match generate(&image, &mut self.model, &self.config) {
            Ok(text) => {
                advance(&source, &mut state, ItemState::Captioned);
                CaptionResult::captioned(source, text, start_time.elapsed())
            }
            Err(e) => {
                advance(&source, &mut state, ItemState::GenerateFailed);
                log::warn!("Failed to caption {source} ({}): {e}", e.kind().as_str());
                CaptionResult::failed(source, &e, start_time.elapsed())
            }
        };

        log::debug!("Item finished in {:?}", result.elapsed());
        result
    }

    /// Captions a single input.
    ///
    /// The caption in flight always completes. A cancellation seen afterwards marks the
    /// run as interrupted instead of letting the item decide the outcome.
    pub fn run_single<W: Write>(
        &mut self,
        input: &str,
        reporter: &mut Reporter<W>,
        cancel: &AtomicBool,
    ) -> SingleReport {
        let result = self.caption(input);
        reporter.result(&result);

        let interrupted = cancel.load(Ordering::SeqCst);
        if interrupted {
            log::info!("Cancelled while captioning {}", result.source());
            reporter.farewell(LoopExit::Interrupted);
        }

        SingleReport {
            result,
            interrupted,
        }
    }

    /// Captions every input in order, checking for cancellation between items.
    pub fn run_batch<W: Write>(
        &mut self,
        inputs: &[String],
        reporter: &mut Reporter<W>,
        cancel: &AtomicBool,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, input) in inputs.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                log::info!("Cancelled after {index} of {} images", inputs.len());
                report.interrupted = true;
                break;
            }

            reporter.item_header(index + 1, inputs.len(), input);
            let result = self.caption(input);
            reporter.result(&result);
            report.results.push(result);
        }

        reporter.summary(&report);
        if report.interrupted {
            reporter.farewell(LoopExit::Interrupted);
        }

        report
    }

    /// Captions the local sample images, or the demo url when there are none.
    pub fn run_demo<W: Write>(
        &mut self,
        images_dir: &Path,
        reporter: &mut Reporter<W>,
        cancel: &AtomicBool,
    ) -> BatchReport {
        let inputs = demo_inputs(images_dir);
        self.run_batch(&inputs, reporter, cancel)
    }

    /// Prompts for inputs until a quit command, the end of input or a cancellation.
    ///
    /// Empty inputs are rejected with a warning and do not count as caption attempts.
    /// Cancellation is only observed between prompts, never during a caption.
    pub fn run_interactive<P: PromptSource, W: Write>(
        &mut self,
        prompt: &mut P,
        reporter: &mut Reporter<W>,
        cancel: &AtomicBool,
    ) -> InteractiveSummary {
        let mut results = Vec::new();
        let mut rejected_inputs = 0;

        reporter.info("🔄 Interactive mode started! Type 'q' to quit");

        let exit = loop {
            if cancel.load(Ordering::SeqCst) {
                break LoopExit::Interrupted;
            }

            reporter.separator();

            let line = match prompt.next_line(INTERACTIVE_PROMPT) {
                PromptEvent::Line(line) => line,
                PromptEvent::Closed => break LoopExit::Closed,
                PromptEvent::Interrupted => break LoopExit::Interrupted,
            };

            match InputCommand::parse(&line) {
                InputCommand::Quit => break LoopExit::Quit,
                InputCommand::Empty => {
                    rejected_inputs += 1;
                    reporter.warning("Please enter a valid path or URL");
                }
                InputCommand::Source(input) => {
                    let result = self.caption(&input);
                    reporter.result(&result);
                    results.push(result);
                }
            }
        };

        reporter.farewell(exit);

        InteractiveSummary {
            results,
            rejected_inputs,
            exit,
        }
    }
}

fn advance(source: &ImageSource, state: &mut ItemState, next: ItemState) {
    log::debug!("{source}: {} -> {}", state.as_str(), next.as_str());
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn result_states() {
        let source = ImageSource::classify("cat.jpg");

        let ok = CaptionResult::captioned(source.clone(), "a cat".into(), Duration::from_millis(3));
        assert_eq!(ok.state(), ItemState::Captioned);
        assert_eq!(ok.text(), Some("a cat"));
        assert!(ok.error().is_none());
        assert_eq!(ok.elapsed(), Duration::from_millis(3));

        let missing = CaptionResult::failed(
            source.clone(),
            &CaptionError::NotFound(PathBuf::from("cat.jpg")),
            Duration::ZERO,
        );
        assert_eq!(missing.state(), ItemState::ResolveFailed);
        assert!(missing.text().is_none());
        assert_eq!(missing.message(), Some("file not found: cat.jpg"));

        let broken = CaptionResult::failed(
            source,
            &CaptionError::Inference("oom".into()),
            Duration::ZERO,
        );
        assert_eq!(broken.state(), ItemState::GenerateFailed);
        assert!(broken.state().is_terminal());
        assert!(!ItemState::Generating.is_terminal());
    }

    #[test]
    fn batch_success_needs_one_resolvable_item() {
        let missing = CaptionResult::failed(
            ImageSource::classify("a.jpg"),
            &CaptionError::NotFound(PathBuf::from("a.jpg")),
            Duration::ZERO,
        );
        let broken = CaptionResult::failed(
            ImageSource::classify("b.jpg"),
            &CaptionError::Inference("oom".into()),
            Duration::ZERO,
        );

        let report = BatchReport {
            results: vec![missing.clone()],
            interrupted: false,
        };
        assert!(!report.is_success());

        let report = BatchReport {
            results: vec![missing, broken],
            interrupted: false,
        };
        assert!(report.is_success());
        assert_eq!(report.failed(), 2);
        assert_eq!(report.captioned(), 0);

        assert!(!BatchReport::default().is_success());
        assert_eq!(BatchReport::default().status(), RunStatus::Failed);
    }

    #[test]
    fn interrupted_runs_are_not_failures() {
        let cancelled = BatchReport {
            results: Vec::new(),
            interrupted: true,
        };
        assert_eq!(cancelled.status(), RunStatus::Interrupted);

        let missing = CaptionResult::failed(
            ImageSource::classify("a.jpg"),
            &CaptionError::NotFound(PathBuf::from("a.jpg")),
            Duration::ZERO,
        );
        let single = SingleReport {
            result: missing.clone(),
            interrupted: false,
        };
        assert_eq!(single.status(), RunStatus::Failed);

        let single = SingleReport {
            result: missing,
            interrupted: true,
        };
        assert_eq!(single.status(), RunStatus::Interrupted);
    }
}
