//! Command-line runner for one-off mobile automation steps.
//!
//! Every command other than `status` opens a fresh session on the configured
//! Appium server, runs a single step inside a scenario and tears the session
//! down again. Failed steps leave a screenshot and the UI hierarchy in the
//! artifacts directory.
//!
//! # Usage
//!
//! ```bash
//! # Check that the server is up
//! mobilecheck status
//!
//! # Tap by accessibility id, falling back to the resource id
//! mobilecheck tap accessibility-id=login --fallback id=com.example:id/login
//!
//! # Type into a field
//! mobilecheck type id=com.example:id/username "standard_user"
//!
//! # Read text, as JSON
//! mobilecheck --format json read id=com.example:id/title
//!
//! # Tap at coordinates
//! mobilecheck tap-at 540 1200
//!
//! # Draw a square on a canvas
//! mobilecheck draw --canvas id=com.example:id/signature --half 80
//!
//! # Use a different config file and a longer wait
//! mobilecheck -c ./device.properties -t 30 visible accessibility-id=cart
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mobilecheck_core::action::ActionPolicy;
use mobilecheck_core::config::{mobilecheck_dir, RunConfig};
use mobilecheck_core::driver::DriverError;
use mobilecheck_core::element::{Locator, LocatorChain};
use mobilecheck_core::gesture::ScrollDirection;
use mobilecheck_core::page::Interactor;
use mobilecheck_core::scenario::{ensure, FailureArtifacts, ScenarioContext, ScenarioHooks, StepError, StepResult};
use mobilecheck_core::screen::ScreenState;
use mobilecheck_core::session::{ContextKey, SessionError, SessionRegistry, WebDriverSessionFactory};
use mobilecheck_core::webdriver::WebDriverClient;

/// Command-line runner for mobile UI automation.
#[derive(Parser)]
#[command(name = "mobilecheck")]
#[command(about = "Run single automation steps against an Appium server")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.mobilecheck/config.properties)
    #[arg(short, long, env = "MOBILECHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Explicit wait in seconds, overriding the configuration
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Directory for failure screenshots and page sources
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl From<Direction> for ScrollDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => ScrollDirection::Up,
            Direction::Down => ScrollDirection::Down,
            Direction::Left => ScrollDirection::Left,
            Direction::Right => ScrollDirection::Right,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Query the server status without opening a session
    Status,

    /// Open a session and report the foreground app
    Launch,

    /// Tap an element
    Tap {
        /// Locator as strategy=selector (e.g. accessibility-id=login)
        locator: String,
        /// Fallback locators, tried in order
        #[arg(long)]
        fallback: Vec<String>,
    },

    /// Clear an element and type text into it
    Type {
        /// Locator as strategy=selector
        locator: String,
        /// Text to type
        text: String,
        /// Fallback locators, tried in order
        #[arg(long)]
        fallback: Vec<String>,
    },

    /// Print an element's text
    Read {
        /// Locator as strategy=selector
        locator: String,
        /// Fallback locators, tried in order
        #[arg(long)]
        fallback: Vec<String>,
    },

    /// Succeed if an element becomes visible within the wait
    Visible {
        /// Locator as strategy=selector
        locator: String,
        /// Fallback locators, tried in order
        #[arg(long)]
        fallback: Vec<String>,
    },

    /// Tap at screen coordinates
    TapAt {
        /// X coordinate
        x: i32,
        /// Y coordinate
        y: i32,
    },

    /// Draw a closed square with a single finger
    Draw {
        /// Element to centre the square on (defaults to the screen centre)
        #[arg(long)]
        canvas: Option<String>,
        /// Half the side length, in pixels
        #[arg(long, default_value = "100")]
        half: i32,
    },

    /// Scroll one page in a direction
    Scroll {
        direction: Direction,
    },

    /// Print the UI hierarchy
    Source,

    /// Save a PNG screenshot
    Screenshot {
        /// Output file
        #[arg(default_value = "screenshot.png")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_dir.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_tracing(log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "mobilecheck.log");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file_appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[derive(Debug)]
enum CliError {
    Connection(String),
    ActionFailed(String),
    Usage(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::ActionFailed(_) => ExitCode::from(1),
            CliError::Connection(_) => ExitCode::from(2),
            CliError::Usage(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Connection(msg) => write!(f, "Connection error: {}", msg),
            CliError::ActionFailed(msg) => write!(f, "Action failed: {}", msg),
            CliError::Usage(msg) => write!(f, "Usage error: {}", msg),
        }
    }
}

impl From<StepError> for CliError {
    fn from(e: StepError) -> Self {
        match e {
            StepError::Session(session) => session.into(),
            StepError::Io { .. } => CliError::Usage(e.to_string()),
            StepError::Driver(DriverError::NotConnected | DriverError::ConnectionLost(_)) => {
                CliError::Connection(e.to_string())
            }
            other => CliError::ActionFailed(other.to_string()),
        }
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::MalformedEndpoint { .. } => CliError::Usage(e.to_string()),
            _ => CliError::Connection(e.to_string()),
        }
    }
}

/// One step, with its locators already parsed.
enum Step {
    Launch,
    Tap(LocatorChain),
    Type(LocatorChain, String),
    Read(LocatorChain),
    Visible(LocatorChain),
    TapAt(i32, i32),
    Draw(Option<LocatorChain>, i32),
    Scroll(ScrollDirection),
    Source,
    Screenshot(PathBuf),
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Launch => "launch",
            Step::Tap(_) => "tap",
            Step::Type(..) => "type",
            Step::Read(_) => "read",
            Step::Visible(_) => "visible",
            Step::TapAt(..) => "tap-at",
            Step::Draw(..) => "draw",
            Step::Scroll(_) => "scroll",
            Step::Source => "source",
            Step::Screenshot(_) => "screenshot",
        }
    }

    fn target(&self) -> String {
        match self {
            Step::Tap(chain) | Step::Type(chain, _) | Step::Read(chain) | Step::Visible(chain) => chain.to_string(),
            Step::TapAt(x, y) => format!("{x},{y}"),
            Step::Draw(Some(chain), _) => chain.to_string(),
            Step::Scroll(direction) => direction.to_string(),
            Step::Screenshot(path) => path.display().to_string(),
            Step::Launch | Step::Draw(None, _) | Step::Source => String::new(),
        }
    }

    fn from_command(command: Command) -> Result<Option<Self>, CliError> {
        let step = match command {
            Command::Status => return Ok(None),
            Command::Launch => Step::Launch,
            Command::Tap { locator, fallback } => Step::Tap(parse_chain(&locator, &fallback)?),
            Command::Type { locator, text, fallback } => Step::Type(parse_chain(&locator, &fallback)?, text),
            Command::Read { locator, fallback } => Step::Read(parse_chain(&locator, &fallback)?),
            Command::Visible { locator, fallback } => Step::Visible(parse_chain(&locator, &fallback)?),
            Command::TapAt { x, y } => Step::TapAt(x, y),
            Command::Draw { canvas, half } => {
                if half <= 0 {
                    return Err(CliError::Usage(format!("--half must be positive, got {half}")));
                }
                let canvas = canvas.map(|c| parse_chain(&c, &[])).transpose()?;
                Step::Draw(canvas, half)
            }
            Command::Scroll { direction } => Step::Scroll(direction.into()),
            Command::Source => Step::Source,
            Command::Screenshot { output } => Step::Screenshot(output),
        };
        Ok(Some(step))
    }
}

fn parse_chain(primary: &str, fallbacks: &[String]) -> Result<LocatorChain, CliError> {
    let parse = |text: &str| {
        text.parse::<Locator>()
            .map_err(|e| CliError::Usage(format!("bad locator '{}': {}", text, e)))
    };
    let mut chain = LocatorChain::single(parse(primary)?);
    for fallback in fallbacks {
        chain = chain.or(parse(fallback)?);
    }
    Ok(chain)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = RunConfig::load(cli.config.as_deref()).map_err(|e| CliError::Usage(e.to_string()))?;
    if let Some(secs) = cli.timeout {
        config.explicit_wait = Duration::from_secs(secs);
    }

    let Some(step) = Step::from_command(cli.command)? else {
        return server_status(&config.server_url, cli.format).await;
    };

    let artifacts_dir = cli.artifacts.unwrap_or_else(|| mobilecheck_dir().join("artifacts"));
    let policy = config.action_policy();
    let registry = Arc::new(SessionRegistry::new(Arc::new(WebDriverSessionFactory::new(config.clone()))));
    let mut hooks = ScenarioHooks::new(registry);
    if let Some(app) = &config.app_package {
        hooks = hooks.with_target_app(app.clone());
    }

    let name = step.name();
    let target = step.target();
    let (tx, rx) = oneshot::channel::<Value>();

    let report = hooks
        .run(name, ContextKey::new(), move |ctx| async move {
            let output = perform(step, ctx, policy).await?;
            let _ = tx.send(output);
            Ok(())
        })
        .await;

    let output = rx.await.unwrap_or(Value::Null);
    let duration_ms = report.duration.as_millis() as u64;

    let saved = match &report.artifacts {
        Some(artifacts) => save_artifacts(&artifacts_dir, name, artifacts),
        None => Vec::new(),
    };

    if cli.format == OutputFormat::Json {
        let document = json!({
            "command": name,
            "target": target,
            "status": report.status,
            "duration_ms": duration_ms,
            "output": output,
            "error": report.error.as_ref().map(|e| e.to_string()),
            "artifacts": saved,
        });
        println!("{}", serde_json::to_string_pretty(&document).unwrap_or_else(|_| document.to_string()));
    } else {
        print_text(&output);
        if !cli.quiet {
            let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3fZ");
            eprintln!("|{}|{}|{}|{}ms|", now, name, target, duration_ms);
            for path in &saved {
                eprintln!("artifact: {}", path.display());
            }
        }
    }

    match report.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn perform(step: Step, ctx: ScenarioContext, policy: ActionPolicy) -> StepResult<Value> {
    let session = Arc::clone(ctx.session());
    let page = Interactor::new(session.driver_handle(), policy);

    let output = match step {
        Step::Launch => {
            let foreground = ScreenState::foreground_identity(page.driver()).await?;
            json!({
                "session_id": session.id,
                "endpoint": session.endpoint,
                "package": foreground.package,
                "activity": foreground.activity,
            })
        }
        Step::Tap(chain) => {
            page.tap(&chain).await?;
            Value::Null
        }
        Step::Type(chain, text) => {
            page.type_text(&chain, &text).await?;
            Value::Null
        }
        Step::Read(chain) => Value::String(page.read_text(&chain).await?),
        Step::Visible(chain) => {
            let visible = page.is_visible(&chain).await;
            ensure(visible, format!("{chain} not visible"))?;
            Value::Bool(visible)
        }
        Step::TapAt(x, y) => {
            page.tap_at(x, y).await?;
            Value::Null
        }
        Step::Draw(canvas, half) => {
            page.draw_square(canvas.as_ref(), half).await?;
            Value::Null
        }
        Step::Scroll(direction) => {
            page.scroll(direction).await?;
            Value::Null
        }
        Step::Source => Value::String(ScreenState::snapshot_markup(page.driver()).await?),
        Step::Screenshot(path) => {
            let png = page.driver().screenshot().await?;
            if let Err(source) = std::fs::write(&path, &png) {
                return Err(StepError::Io { path, source });
            }
            json!({ "path": path, "bytes": png.len() })
        }
    };
    Ok(output)
}

async fn server_status(endpoint: &str, format: OutputFormat) -> Result<(), CliError> {
    let status = WebDriverClient::status(endpoint).await?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&status).unwrap_or_else(|_| status.to_string()));
    } else {
        let ready = status.get("ready").and_then(Value::as_bool).unwrap_or(false);
        let state = if ready { "ready" } else { "not ready" };
        match status.get("message").and_then(Value::as_str) {
            Some(message) if !message.is_empty() => println!("{} {} ({})", endpoint, state, message),
            _ => println!("{} {}", endpoint, state),
        }
    }
    Ok(())
}

fn print_text(output: &Value) {
    match output {
        Value::Null => {}
        Value::String(text) => println!("{}", text),
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::String(s) => println!("{}: {}", key, s),
                    other => println!("{}: {}", key, other),
                }
            }
        }
        other => println!("{}", other),
    }
}

/// Writes failure artifacts as `<command>-<timestamp>.{png,xml}`.
///
/// Write failures are logged; the step error is what the caller reports.
fn save_artifacts(dir: &Path, name: &str, artifacts: &FailureArtifacts) -> Vec<PathBuf> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "cannot create artifacts directory");
        return Vec::new();
    }
    let stem = format!("{}-{}", name, chrono::Local::now().format("%Y%m%d-%H%M%S%.3f"));
    let files = [
        ("png", artifacts.screenshot.as_deref()),
        ("xml", artifacts.markup.as_deref().map(str::as_bytes)),
    ];

    let mut saved = Vec::new();
    for (extension, bytes) in files {
        let Some(bytes) = bytes else { continue };
        let path = dir.join(format!("{stem}.{extension}"));
        match std::fs::write(&path, bytes) {
            Ok(()) => {
                info!(path = %path.display(), "saved failure artifact");
                saved.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "cannot write failure artifact"),
        }
    }
    saved
}
