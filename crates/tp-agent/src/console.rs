//! Line-oriented terminal input shared by the REPL and the approval prompt.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;

type LineReader = Lines<Box<dyn AsyncBufRead + Unpin + Send>>;

/// One reader for the whole session, so prompts issued from different
/// places (REPL loop, approval gate) never race for stdin.
pub struct Console {
    lines: Mutex<LineReader>,
}

impl Console {
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let boxed: Box<dyn AsyncBufRead + Unpin + Send> = Box::new(reader);
        Self {
            lines: Mutex::new(boxed.lines()),
        }
    }

    /// Print `prompt` (no newline) and read one line. `None` on EOF.
    pub async fn read_line(&self, prompt: &str) -> std::io::Result<Option<String>> {
        if !prompt.is_empty() {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(prompt.as_bytes())?;
            stdout.flush()?;
        }
        let mut lines = self.lines.lock().await;
        lines.next_line().await
    }
}
