use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lumen_chat::{ConversationController, ConversationScreen, ExitReason, PeerRegion};
use lumen_llm::{CannedDispatcher, PromptDispatcher, create_dispatcher};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Lines};

use crate::settings::{EngineSettings, SettingsStore};
use crate::terminal::{TerminalTabBar, TranscriptPrinter, spawn_renderer};

pub const CONFIG_PATH_ENV: &str = "LUMEN_CONFIG";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("transcript renderer failed on `{stage}`: {source}"))]
    Render {
        stage: &'static str,
        source: io::Error,
    },
    #[snafu(display("transcript renderer task stopped on `{stage}`: {source}"))]
    RendererJoin {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppArgs {
    pub config_path: Option<PathBuf>,
}

impl AppArgs {
    /// Explicit `--config`, then `LUMEN_CONFIG`, then the per-user config directory.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(SettingsStore::default_config_path)
    }
}

pub fn parse_args(args: impl IntoIterator<Item = String>) -> AppResult<AppArgs> {
    let mut parsed = AppArgs::default();
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--config" | "-c" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-config-value",
                    arg: "--config",
                })?;
                parsed.config_path = Some(PathBuf::from(value));
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(parsed)
}

/// Line commands understood by the terminal shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Exit(ExitReason),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "/back" => Some(Self::Exit(ExitReason::Back)),
            "/replace" => Some(Self::Exit(ExitReason::Replace)),
            "/quit" | "/exit" => Some(Self::Exit(ExitReason::Unmount)),
            _ => None,
        }
    }
}

/// Builds the configured dispatcher, or the canned one when that is impossible.
pub fn build_dispatcher(settings: &EngineSettings) -> Arc<dyn PromptDispatcher> {
    match settings.dispatcher_config().and_then(create_dispatcher) {
        Ok(dispatcher) => dispatcher,
        Err(error) => {
            tracing::warn!(
                stage = error.stage(),
                %error,
                "configured dispatcher unavailable, answering offline"
            );
            Arc::new(CannedDispatcher::new(
                settings.canned_reply.clone(),
                Duration::from_millis(settings.canned_delay_ms),
            ))
        }
    }
}

pub fn mount_screen(
    settings: &EngineSettings,
    region: Arc<dyn PeerRegion>,
) -> ConversationScreen {
    let controller =
        ConversationController::new(build_dispatcher(settings), settings.controller_config());
    ConversationScreen::open(controller, region, settings.tab_bar.clone())
}

/// Feeds input lines to `screen` until a command or end of input ends it.
///
/// End of input waits for the pending exchange before unmounting, so piped
/// sessions still see their last answer.
pub async fn drive_screen<R>(
    screen: &ConversationScreen,
    lines: &mut Lines<R>,
) -> AppResult<ExitReason>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await.context(ReadInputSnafu {
        stage: "read-input-line",
    })? {
        match Command::parse(&line) {
            Some(Command::Exit(reason)) => return Ok(reason),
            None => screen.submit(&line),
        }
    }

    screen.settled().await;
    Ok(ExitReason::Unmount)
}

pub async fn run(args: AppArgs) -> AppResult<()> {
    let store = SettingsStore::new(args.resolve_config_path());
    let tab_bar: Arc<dyn PeerRegion> = Arc::new(TerminalTabBar::stdout());
    run_shell(&store, tab_bar, tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}

/// Mounts screens over `input` until one closes for a reason other than `Replace`.
///
/// Each replacement reloads the settings first. Returns `output` once the last
/// screen's transcript has been printed.
pub async fn run_shell<R, W>(
    store: &SettingsStore,
    region: Arc<dyn PeerRegion>,
    input: R,
    mut output: W,
) -> AppResult<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(input).lines();
    let mut settings = store.settings();

    loop {
        let screen = mount_screen(&settings, region.clone());
        let renderer = spawn_renderer(screen.subscribe(), TranscriptPrinter::new(output));

        let reason = drive_screen(&screen, &mut lines).await?;
        screen.close(reason);

        output = renderer
            .await
            .context(RendererJoinSnafu {
                stage: "join-transcript-renderer",
            })?
            .context(RenderSnafu {
                stage: "print-transcript",
            })?
            .into_inner();

        match reason {
            ExitReason::Replace => {
                settings = store.reload();
                tracing::info!(
                    path = ?store.config_path(),
                    "replacing conversation screen"
                );
            }
            ExitReason::Back | ExitReason::Unmount => return Ok(output),
        }
    }
}
