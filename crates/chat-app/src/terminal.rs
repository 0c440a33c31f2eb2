use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use lumen_chat::{Message, PeerRegion, TranscriptSnapshot, VisibilityConfig};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Tab bar of the terminal shell. It has no pixels, so transitions are printed as status lines.
pub struct TerminalTabBar<W = io::Stdout> {
    hidden: AtomicBool,
    out: Mutex<W>,
}

impl TerminalTabBar<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TerminalTabBar<W> {
    pub fn new(out: W) -> Self {
        Self {
            hidden: AtomicBool::new(false),
            out: Mutex::new(out),
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.load(Ordering::Acquire)
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn status(&self, line: &str) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Err(error) = writeln!(out, "[{line}]").and_then(|()| out.flush()) {
            tracing::warn!(%error, "failed to print tab bar status");
        }
    }
}

impl<W: Write + Send> PeerRegion for TerminalTabBar<W> {
    fn set_hidden(&self) {
        if self.hidden.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("tab bar hidden");
        self.status("tab bar hidden");
    }

    fn set_visible(&self, config: &VisibilityConfig) {
        self.hidden.store(false, Ordering::Release);
        tracing::debug!(
            height = config.height,
            background = %config.background_color,
            "tab bar restored"
        );
        self.status(&format!(
            "tab bar restored: height {} bg {}",
            config.height, config.background_color
        ));
    }
}

/// Prints transcript messages, each exactly once, in order.
pub struct TranscriptPrinter<W> {
    out: W,
    printed: usize,
}

impl<W: AsyncWrite + Unpin> TranscriptPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    pub fn printed(&self) -> usize {
        self.printed
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Prints whatever `snapshot` holds beyond what was already printed.
    pub async fn print_new(&mut self, snapshot: &TranscriptSnapshot) -> io::Result<usize> {
        let fresh = snapshot.since(self.printed);
        for message in fresh {
            self.out.write_all(format_message(message).as_bytes()).await?;
        }
        self.out.flush().await?;
        self.printed += fresh.len();
        Ok(fresh.len())
    }
}

fn format_message(message: &Message) -> String {
    format!("{}> {}\n", message.sender().label(), message.text())
}

/// Follows a transcript until its session goes away, printing every new message.
pub fn spawn_renderer<W>(
    mut updates: watch::Receiver<TranscriptSnapshot>,
    mut printer: TranscriptPrinter<W>,
) -> JoinHandle<io::Result<TranscriptPrinter<W>>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            printer.print_new(&snapshot).await?;
            if updates.changed().await.is_err() {
                break;
            }
        }
        let last = updates.borrow().clone();
        printer.print_new(&last).await?;
        tracing::debug!(printed = printer.printed(), "transcript renderer stopped");
        Ok(printer)
    })
}
