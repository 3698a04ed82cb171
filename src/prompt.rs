use std::{
    collections::VecDeque,
    io::{self, BufRead, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::Duration,
};

/// Inputs that end the interactive loop, compared case-insensitively.
pub const QUIT_COMMANDS: [&str; 3] = ["q", "quit", "exit"];

/// What the operator typed, after trimming.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputCommand {
    Quit,
    Empty,
    Source(String),
}

impl InputCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            InputCommand::Empty
        } else if QUIT_COMMANDS.iter().any(|cmd| line.eq_ignore_ascii_case(cmd)) {
            InputCommand::Quit
        } else {
            InputCommand::Source(line.to_string())
        }
    }
}

/// Outcome of waiting for the next line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptEvent {
    Line(String),
    /// The input stream reached its end.
    Closed,
    /// The operator cancelled while waiting.
    Interrupted,
}

/// Blocking source of operator input.
pub trait PromptSource {
    /// Shows `prompt` and blocks until a line, the end of input or a cancellation.
    fn next_line(&mut self, prompt: &str) -> PromptEvent;
}

/// Waits for lines arriving over a channel and writes the prompt to `out`.
///
/// The waiting side polls the channel, which lets it notice a cancellation without the
/// operator pressing enter.
pub struct ChannelPrompt<W: Write> {
    lines: mpsc::Receiver<io::Result<String>>,
    cancel: Arc<AtomicBool>,
    out: W,
    poll_interval: Duration,
}

/// Reads lines from stdin on a background thread, prompting on stderr.
///
/// Stdout only carries results, so `--json` output stays one object per line.
pub type StdinPrompt = ChannelPrompt<io::Stderr>;

impl ChannelPrompt<io::Stderr> {
    /// Starts the stdin reader thread.
    pub fn spawn(cancel: Arc<AtomicBool>) -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Self::new(rx, cancel, io::stderr())
    }
}

impl<W: Write> ChannelPrompt<W> {
    pub fn new(lines: mpsc::Receiver<io::Result<String>>, cancel: Arc<AtomicBool>, out: W) -> Self {
        Self {
            lines,
            cancel,
            out,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Consumes the prompt and returns the prompt writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PromptSource for ChannelPrompt<W> {
    fn next_line(&mut self, prompt: &str) -> PromptEvent {
        if let Err(e) = write!(self.out, "{prompt}").and_then(|_| self.out.flush()) {
            log::debug!("Failed to show the prompt: {e}");
        }

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return PromptEvent::Interrupted;
            }

            match self.lines.recv_timeout(self.poll_interval) {
                Ok(Ok(line)) => return PromptEvent::Line(line),
                Ok(Err(e)) => {
                    log::error!("Failed to read from stdin: {e}");
                    return PromptEvent::Closed;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return PromptEvent::Closed,
            }
        }
    }
}

/// Replays a fixed list of lines, then reports the end of input.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    lines: VecDeque<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl PromptSource for ScriptedPrompt {
    fn next_line(&mut self, _prompt: &str) -> PromptEvent {
        match self.lines.pop_front() {
            Some(line) => PromptEvent::Line(line),
            None => PromptEvent::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(InputCommand::parse("  "), InputCommand::Empty);
        assert_eq!(InputCommand::parse(""), InputCommand::Empty);
        assert_eq!(InputCommand::parse("Q"), InputCommand::Quit);
        assert_eq!(InputCommand::parse(" EXIT \n"), InputCommand::Quit);
        assert_eq!(InputCommand::parse("quit"), InputCommand::Quit);
        assert_eq!(
            InputCommand::parse("  cat.jpg "),
            InputCommand::Source("cat.jpg".to_string())
        );
        // only whole words quit
        assert_eq!(
            InputCommand::parse("quit.png"),
            InputCommand::Source("quit.png".to_string())
        );
    }

    #[test]
    fn scripted_prompt_ends_with_closed() {
        let mut prompt = ScriptedPrompt::new(["a", "b"]);
        assert_eq!(prompt.next_line(""), PromptEvent::Line("a".to_string()));
        assert_eq!(prompt.next_line(""), PromptEvent::Line("b".to_string()));
        assert_eq!(prompt.next_line(""), PromptEvent::Closed);
    }

    #[test]
    fn channel_prompt_writes_the_prompt_to_its_own_writer() {
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut prompt = ChannelPrompt::new(rx, cancel, Vec::new());

        tx.send(Ok("cat.jpg".to_string())).unwrap();
        assert_eq!(prompt.next_line("> "), PromptEvent::Line("cat.jpg".to_string()));

        drop(tx);
        assert_eq!(prompt.next_line("> "), PromptEvent::Closed);
        assert_eq!(prompt.into_inner(), b"> > ");
    }

    #[test]
    fn channel_prompt_stops_waiting_on_cancellation() {
        let (tx, rx) = mpsc::channel::<io::Result<String>>();
        let cancel = Arc::new(AtomicBool::new(false));
        let mut prompt = ChannelPrompt::new(rx, cancel.clone(), Vec::new());

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.store(true, Ordering::SeqCst);
        });

        assert_eq!(prompt.next_line(""), PromptEvent::Interrupted);
        drop(tx);
    }

    #[test]
    fn read_errors_end_the_input() {
        let (tx, rx) = mpsc::channel();
        let mut prompt = ChannelPrompt::new(rx, Arc::new(AtomicBool::new(false)), io::sink());

        tx.send(Err(io::Error::other("broken pipe"))).unwrap();
        assert_eq!(prompt.next_line(""), PromptEvent::Closed);
    }
}
