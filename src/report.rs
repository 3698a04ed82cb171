use std::{
    fmt,
    io::{self, Write},
};

use serde_json::json;

use crate::pipeline::{BatchReport, CaptionResult, LoopExit};

const SEPARATOR_WIDTH: usize = 50;
const MAX_SOURCE_DISPLAY: usize = 60;

/// How results are written for the operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One json object per line.
    Json,
}

/// Writes captions, warnings and summaries to the operator.
///
/// Kept apart from logging: logs describe what the tool does, the report is what the
/// operator asked for.
pub struct Reporter<W: Write> {
    out: W,
    format: ReportFormat,
}

impl Reporter<io::Stdout> {
    pub fn stdout(format: ReportFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, format: ReportFormat) -> Self {
        Self { out, format }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Free-form status line, only shown in text mode.
    pub fn info(&mut self, message: &str) {
        if self.format == ReportFormat::Text {
            self.emit(format_args!("{message}"));
        }
    }

    pub fn separator(&mut self) {
        if self.format == ReportFormat::Text {
            self.emit(format_args!("\n{}", "=".repeat(SEPARATOR_WIDTH)));
        }
    }

    pub fn item_header(&mut self, index: usize, total: usize, input: &str) {
        if self.format == ReportFormat::Text {
            self.emit(format_args!(
                "\n--- Image {index}/{total}: {} ---",
                truncate_source(input, MAX_SOURCE_DISPLAY)
            ));
        }
    }

    pub fn result(&mut self, result: &CaptionResult) {
        match self.format {
            ReportFormat::Text => match (result.text(), result.message()) {
                (Some(text), _) => self.emit(format_args!("🎯 Caption: {text}")),
                (None, message) => self.emit(format_args!(
                    "❌ {}: {}",
                    result.source(),
                    message.unwrap_or("unknown error")
                )),
            },
            ReportFormat::Json => match serde_json::to_string(result) {
                Ok(line) => self.emit(format_args!("{line}")),
                Err(e) => log::error!("Failed to serialize result: {e}"),
            },
        }
    }

    pub fn warning(&mut self, message: &str) {
        match self.format {
            ReportFormat::Text => self.emit(format_args!("⚠️ {message}")),
            ReportFormat::Json => self.emit(format_args!("{}", json!({ "warning": message }))),
        }
    }

    /// Lists every item of a batch with its outcome, then the totals.
    pub fn summary(&mut self, report: &BatchReport) {
        if self.format == ReportFormat::Json {
            let summary = json!({
                "captioned": report.captioned(),
                "failed": report.failed(),
                "interrupted": report.interrupted,
            });
            self.emit(format_args!("{summary}"));
            return;
        }

        let rule = "=".repeat(SEPARATOR_WIDTH);
        self.emit(format_args!("\n{rule}\n📋 RESULTS\n{rule}"));

        for (index, result) in report.results.iter().enumerate() {
            let source = result.source().to_string();
            self.emit(format_args!(
                "\n🖼️  Image {}:\n   Source: {}",
                index + 1,
                truncate_source(&source, MAX_SOURCE_DISPLAY)
            ));
            match (result.text(), result.message()) {
                (Some(text), _) => self.emit(format_args!("   📝 Caption: {text}")),
                (None, message) => self.emit(format_args!(
                    "   ❌ Failed: {}",
                    message.unwrap_or("unknown error")
                )),
            }
        }

        self.emit(format_args!(
            "\n{rule}\n✅ {} captioned, ❌ {} failed",
            report.captioned(),
            report.failed()
        ));
    }

    pub fn farewell(&mut self, exit: LoopExit) {
        if self.format == ReportFormat::Json {
            return;
        }
        match exit {
            LoopExit::Interrupted => self.emit(format_args!("\n👋 Program interrupted!")),
            LoopExit::Quit | LoopExit::Closed => self.emit(format_args!("👋 Goodbye!")),
        }
    }

    fn emit(&mut self, line: fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.out, "{line}") {
            log::warn!("Failed to write report: {e}");
        }
    }
}

/// Shortens long sources for display, keeping char boundaries.
pub fn truncate_source(source: &str, max_chars: usize) -> String {
    if source.chars().count() <= max_chars {
        return source.to_string();
    }
    let head: String = source.chars().take(max_chars).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::CaptionError, source::ImageSource};
    use std::{path::PathBuf, time::Duration};

    fn output(reporter: Reporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn truncates_long_sources() {
        assert_eq!(truncate_source("short.jpg", 60), "short.jpg");
        let url = format!("https://example.com/{}", "x".repeat(80));
        let shown = truncate_source(&url, 60);
        assert_eq!(shown.chars().count(), 63);
        assert!(shown.ends_with("..."));
        assert_eq!(truncate_source("ééééé", 2), "éé...");
    }

    #[test]
    fn text_summary_lists_every_item() {
        let report = BatchReport {
            results: vec![
                CaptionResult::captioned(
                    ImageSource::classify("a.jpg"),
                    "a dog".to_string(),
                    Duration::ZERO,
                ),
                CaptionResult::failed(
                    ImageSource::classify("b.jpg"),
                    &CaptionError::NotFound(PathBuf::from("b.jpg")),
                    Duration::ZERO,
                ),
            ],
            interrupted: false,
        };

        let mut reporter = Reporter::new(Vec::new(), ReportFormat::Text);
        reporter.summary(&report);
        let text = output(reporter);

        assert!(text.contains("📋 RESULTS"));
        assert!(text.contains("📝 Caption: a dog"));
        assert!(text.contains("❌ Failed: file not found: b.jpg"));
        assert!(text.contains("1 captioned, ❌ 1 failed"));
    }

    #[test]
    fn json_results_are_one_object_per_line() {
        let mut reporter = Reporter::new(Vec::new(), ReportFormat::Json);
        reporter.info("not shown");
        reporter.result(&CaptionResult::failed(
            ImageSource::classify("https://example.com/a.png"),
            &CaptionError::Network {
                url: "https://example.com/a.png".to_string(),
                reason: "timed out".to_string(),
            },
            Duration::ZERO,
        ));
        let text = output(reporter);

        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 1);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["error"], "NetworkError");
        assert_eq!(value["source"]["kind"], "remote_url");
        assert_eq!(value["source"]["location"], "https://example.com/a.png");
        assert!(value["text"].is_null());
    }
}
