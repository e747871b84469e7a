//! Purpose: `pqs` CLI entry point; subscribes to a PQStream service and prints change events.
//! Role: Binary crate root; parses args, runs one subscription, emits events on stdout.
//! Invariants: Events go to stdout in arrival order; diagnostics and logs go to stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Interrupts, `--max`, and a closed stdout cancel the subscription and exit 0.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::time::Duration;

use clap::{Parser, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod output;

use output::{ColorMode, EventFormat, EventPrinter, Tint, paint};
use pqstream::api::{
    ClientConfig, Error, ErrorKind, FilterSpec, Notification, Subscription, SubscriptionClient,
    to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "pqs",
    version,
    about = "Subscribe to row change events streamed by a pqsd server"
)]
struct Cli {
    #[arg(
        long,
        default_value = ":7000",
        help = "pqsd address: http://host:port, host:port, or :port"
    )]
    connect: String,
    #[arg(
        long,
        default_value = ".*",
        help = "Regexp of tables to match (evaluated by the server)"
    )]
    tables: String,
    #[arg(
        long = "connect-timeout-ms",
        default_value_t = 10_000,
        help = "Give up establishing the stream after this many milliseconds"
    )]
    connect_timeout_ms: u64,
    #[arg(long, help = "Bearer token sent with the listen request")]
    token: Option<String>,
    #[arg(long, help = "Stop after receiving this many events")]
    max: Option<u64>,
    #[arg(
        long,
        default_value = "jsonl",
        value_enum,
        help = "Event output: jsonl (one compact document per line) or pretty"
    )]
    format: EventFormat,
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics and pretty output: auto|always|never"
    )]
    color: ColorMode,
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                return Ok(RunOutcome::ok());
            }
            _ => {
                let message = err
                    .to_string()
                    .lines()
                    .next()
                    .unwrap_or("invalid arguments")
                    .trim_start_matches("error: ")
                    .to_string();
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint("Run `pqs --help` for usage."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            (
                Error::new(ErrorKind::Internal)
                    .with_message("failed to start runtime")
                    .with_source(err),
                color_mode,
            )
        })?;

    runtime
        .block_on(listen(cli))
        .map_err(add_hint)
        .map_err(|err| (err, color_mode))
}

async fn listen(cli: Cli) -> Result<RunOutcome, Error> {
    let interrupted = shutdown_signal();
    let mut config = ClientConfig::new(cli.connect)
        .with_connect_timeout(Duration::from_millis(cli.connect_timeout_ms));
    if let Some(token) = cli.token {
        config = config.with_token(token);
    }
    let client = SubscriptionClient::with_config(config)?;
    let mut subscription = client.subscribe(FilterSpec::new(cli.tables)).await?;
    tracing::info!(
        address = %client.base_url(),
        tables = %subscription.filter().table_expression(),
        "subscribed"
    );

    let cancel = subscription.cancel_handle();
    let interrupts = tokio::spawn(async move {
        interrupted.await;
        tracing::info!("interrupt received; cancelling subscription");
        cancel.cancel();
    });

    let printer = EventPrinter::new(cli.format, cli.color);
    let result = consume(&mut subscription, &printer, cli.max).await;
    interrupts.abort();
    result
}

async fn consume(
    subscription: &mut Subscription,
    printer: &EventPrinter,
    max: Option<u64>,
) -> Result<RunOutcome, Error> {
    if max == Some(0) {
        subscription.cancel();
    }
    loop {
        match subscription.next().await? {
            Notification::Event(event) => {
                if let Err(err) = printer.emit(&event) {
                    if err.kind() == io::ErrorKind::BrokenPipe {
                        tracing::debug!("stdout closed; cancelling subscription");
                        subscription.cancel();
                        continue;
                    }
                    subscription.cancel();
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("failed to write event")
                        .with_source(err));
                }
                if max.is_some_and(|max| subscription.events_delivered() >= max) {
                    subscription.cancel();
                }
            }
            Notification::Terminated(outcome) => {
                tracing::info!(
                    events = subscription.events_delivered(),
                    state = ?subscription.state(),
                    "subscription ended"
                );
                outcome.into_result()?;
                return Ok(RunOutcome::ok());
            }
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .try_init();
}

/// Registers interrupt handlers immediately; the returned future resolves on the first signal.
#[cfg(unix)]
fn shutdown_signal() -> impl Future<Output = ()> + Send {
    use tokio::signal::unix::{SignalKind, signal};
    let interrupt = signal(SignalKind::interrupt()).ok();
    let terminate = signal(SignalKind::terminate()).ok();
    async move {
        tokio::select! {
            _ = recv_or_pending(interrupt) => {}
            _ = recv_or_pending(terminate) => {}
        }
    }
}

#[cfg(unix)]
async fn recv_or_pending(signal: Option<tokio::signal::unix::Signal>) {
    match signal {
        Some(mut signal) => {
            signal.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl Future<Output = ()> + Send {
    async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn add_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Transport => {
            err.with_hint("The stream broke mid-flight. Re-run pqs to subscribe again.")
        }
        ErrorKind::Protocol => {
            err.with_hint("The server sent a frame pqs could not decode. Check server version.")
        }
        ErrorKind::Status => err.with_hint("The server ended the stream; see the status message."),
        _ => err,
    }
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Connection => "could not establish stream".to_string(),
        ErrorKind::Transport => "stream failed".to_string(),
        ErrorKind::Protocol => "invalid stream frame".to_string(),
        ErrorKind::Status => "server returned an error status".to_string(),
        ErrorKind::SubscriptionClosed => "subscription closed".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(status) = err.status() {
        inner.insert(
            "status".to_string(),
            json!({"code": status.code.as_i32(), "name": status.code.to_string(), "message": status.message}),
        );
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        paint("error:", Tint::Red, use_color),
        error_message(err)
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!("{} {hint}", paint("hint:", Tint::Yellow, use_color)));
    }
    for cause in error_causes(err) {
        lines.push(format!("{} {cause}", paint("caused by:", Tint::Yellow, use_color)));
    }
    lines.join("\n")
}
