
use std::time::Duration;

use board::config::SyncConfig;
use board::echo::SourceId;
use board::envelope::{CodecError, Decoded, Envelope, decode};
use board::events::{EventHub, LocalEdit};
use board::op::Operation;
use board::reconcile::apply_operation;
use board::session::{SyncSession, Transport, TransportError, View};
use board::tree::{Element, Properties, Tree};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// First reconnect delay for `listen`.
const BACKOFF_BASE: Duration = Duration::from_millis(250);
/// Longest reconnect delay for `listen`, before jitter.
const BACKOFF_MAX: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error("websocket connect failed: {0}")]
    WsConnect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("envelope codec failed: {0}")]
    Codec(#[from] CodecError),
    #[error("timed out waiting for websocket message")]
    Timeout,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for CliError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WsConnect(Box::new(error))
    }
}

#[derive(Parser, Debug)]
#[command(name = "drawsync-cli", about = "Drawsync relay health check, monitor, and replica")]
struct Cli {
    #[arg(long, env = "DRAWSYNC_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the relay health endpoint.
    Ping,
    /// Print every payload the relay carries.
    Listen(ListenArgs),
    /// Send demo envelopes tagged with this process's identity.
    Publish(PublishArgs),
    /// Run a headless replica that applies remote envelopes.
    Mirror(MirrorArgs),
}

#[derive(Args, Debug)]
struct ListenArgs {
    #[arg(long, default_value_t = false, help = "Print each operation's element change and the full JSON of each payload")]
    verbose: bool,

    #[arg(long, help = "Stop after this many seconds")]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct PublishArgs {
    #[arg(long, default_value_t = 5)]
    count: usize,

    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    #[arg(long, default_value_t = false, help = "Attach the full tree to each envelope")]
    snapshot: bool,
}

#[derive(Args, Debug)]
struct MirrorArgs {
    #[arg(long, help = "Stop after this many seconds")]
    timeout: Option<u64>,

    #[arg(long, default_value_t = 0, help = "Insert this many local elements on connect")]
    seed: usize,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ping => run_ping(&cli.base_url).await,
        Command::Listen(args) => run_listen(&cli.base_url, args).await,
        Command::Publish(args) => run_publish(&cli.base_url, args).await,
        Command::Mirror(args) => run_mirror(&cli.base_url, args).await,
    }
}

// =============================================================================
// PING
// =============================================================================

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

// =============================================================================
// LISTEN
// =============================================================================

/// Counters printed when `listen` stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ListenStats {
    envelopes: u64,
    ignored: u64,
    malformed: u64,
}

impl ListenStats {
    fn summary(&self, elapsed: Duration) -> String {
        format!(
            "stats envelopes={} ignored={} malformed={} elapsed={:.2}s",
            self.envelopes,
            self.ignored,
            self.malformed,
            elapsed.as_secs_f64()
        )
    }
}

async fn run_listen(base_url: &str, args: ListenArgs) -> Result<(), CliError> {
    let url = ws_url(base_url)?;
    let started = Instant::now();
    let deadline = args.timeout.map(|secs| started + Duration::from_secs(secs));
    let mut stats = ListenStats::default();

    let result = listen_with_retry(&url, args.verbose, deadline, &mut stats).await;
    eprintln!("{}", stats.summary(started.elapsed()));
    result
}

async fn listen_with_retry(
    url: &str,
    verbose: bool,
    deadline: Option<Instant>,
    stats: &mut ListenStats,
) -> Result<(), CliError> {
    let mut attempt: u32 = 0;

    loop {
        match connect_async(url).await {
            Ok((mut stream, _)) => {
                attempt = 0;
                eprintln!("listening on {url}");
                match listen_until(&mut stream, verbose, deadline, stats).await {
                    Ok(()) => return Ok(()),
                    Err(CliError::WsClosed | CliError::WsConnect(_)) => {
                        tracing::warn!("listen: connection lost");
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => tracing::warn!(error = %e, attempt, "listen: connect failed"),
        }

        let delay = with_jitter(backoff_delay(attempt), &mut rand::rng());
        if deadline.is_some_and(|d| Instant::now() + delay >= d) {
            return Ok(());
        }
        tracing::debug!(delay_ms = delay.as_millis(), attempt, "listen: reconnecting");
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

/// Print payloads until the deadline passes. Returns an error if the socket drops first.
async fn listen_until(
    stream: &mut WsStream,
    verbose: bool,
    deadline: Option<Instant>,
    stats: &mut ListenStats,
) -> Result<(), CliError> {
    loop {
        let wait = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
        let text = match recv_text(stream, wait).await {
            Ok(text) => text,
            Err(CliError::Timeout) => return Ok(()),
            Err(e) => return Err(e),
        };
        for line in describe(&text, verbose, stats) {
            println!("{line}");
        }
    }
}

/// Output lines for a relayed payload. The first line is the summary; with
/// `verbose`, one line per operation change and the raw payload follow.
fn describe(text: &str, verbose: bool, stats: &mut ListenStats) -> Vec<String> {
    let envelope = match decode(text) {
        Ok(Decoded::Op(envelope)) => envelope,
        Ok(Decoded::Ignored { kind }) => {
            stats.ignored += 1;
            return vec![format!("kind={kind} (not an op envelope)")];
        }
        Err(e) => {
            stats.malformed += 1;
            return vec![format!("malformed: {e}")];
        }
    };
    stats.envelopes += 1;

    let mut lines = vec![format!("{} ts={}", envelope.summary(), envelope.timestamp)];
    if !verbose {
        return lines;
    }
    match envelope.changes() {
        Ok(changes) => {
            for (index, change) in changes.iter().enumerate() {
                lines.push(format!("  [{index}] {change}"));
                lines.push(format!("      data: {}", change.element_data));
            }
        }
        Err(e) => lines.push(format!("  changes unavailable: {e}")),
    }
    lines.push(text.to_owned());
    lines
}

/// Exponential reconnect delay for the given attempt, capped at [`BACKOFF_MAX`].
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_MAX)
}

/// `delay` plus up to 25% random jitter.
fn with_jitter(delay: Duration, rng: &mut impl Rng) -> Duration {
    let spread = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
    delay + Duration::from_millis(rng.random_range(0..=spread))
}

// =============================================================================
// PUBLISH
// =============================================================================

async fn run_publish(base_url: &str, args: PublishArgs) -> Result<(), CliError> {
    let url = ws_url(base_url)?;
    let (mut stream, _) = connect_async(url.as_str()).await?;
    let source_id = SourceId::process();
    let element_id = format!("demo-{}", Uuid::new_v4().simple());
    let mut tree = Tree::default();

    for step in 0..args.count {
        let op = demo_operation(&element_id, step);
        tree = match apply_operation(&tree, &op) {
            Ok(next) => next,
            Err(reason) => {
                tracing::warn!(?reason, step, "publish: demo operation did not apply locally");
                tree
            }
        };
        let snapshot = args.snapshot.then(|| tree.children().to_vec());
        let envelope = Envelope::new(source_id.clone(), vec![op], snapshot);
        let payload = envelope.encode()?;
        stream.send(Message::Text(payload.into())).await?;
        println!("sent {}", envelope.summary());

        if step + 1 < args.count {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    stream.close(None).await?;
    Ok(())
}

/// Step 0 inserts a rectangle at the root; later steps move it right.
fn demo_operation(element_id: &str, step: usize) -> Operation {
    let x = 100 + 20 * step;
    let points = json!([[x, 100], [x + 160, 200]]);
    if step == 0 {
        let node = Element::new(element_id, "geometry")
            .with_property("shape", "rectangle")
            .with_property("points", points);
        return Operation::insert(&[0], node);
    }
    let mut properties = Properties::new();
    properties.insert("points".to_owned(), points);
    Operation::set_properties(&[0], properties)
}

// =============================================================================
// MIRROR
// =============================================================================

/// Outbound transport that queues payloads for the websocket writer.
struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl Transport for ChannelTransport {
    fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        self.tx.send(payload.to_owned()).map_err(|_| TransportError::Closed)
    }
}

/// Headless drawing surface: holds the rendered tree and reports each render.
#[derive(Default)]
struct ConsoleView {
    children: Vec<Element>,
    renders: usize,
}

impl View for ConsoleView {
    fn snapshot(&self) -> Vec<Element> {
        self.children.clone()
    }

    fn render(&mut self, children: &[Element]) {
        self.children = children.to_vec();
        self.renders += 1;
        let total = Tree::new(self.children.clone()).len();
        println!("render #{} top_level={} elements={total}", self.renders, self.children.len());
    }
}

/// Local edit inserting `count` sticky notes at the root, as the drawing surface would report it.
fn seed_edit(count: usize) -> Result<LocalEdit, CliError> {
    let mut operations = Vec::with_capacity(count);
    let mut children = Vec::with_capacity(count);
    for index in 0..count {
        let node = Element::new(format!("seed-{}", Uuid::new_v4().simple()), "geometry")
            .with_property("shape", "note")
            .with_property("text", format!("note {index}"));
        operations.push(serde_json::to_value(Operation::insert(&[index], node.clone()))?);
        children.push(node);
    }
    Ok(LocalEdit::new(operations).with_children(children))
}

async fn run_mirror(base_url: &str, args: MirrorArgs) -> Result<(), CliError> {
    let url = ws_url(base_url)?;
    let (mut stream, _) = connect_async(url.as_str()).await?;

    let hub = EventHub::new();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let mut session = SyncSession::new(
        SyncConfig::from_env(),
        ChannelTransport { tx: out_tx },
        ConsoleView::default(),
    );
    session.attach(&hub);
    eprintln!("mirroring {url} as {}", session.source_id());

    if args.seed > 0 {
        hub.edits.emit(&seed_edit(args.seed)?);
    }

    let stop = async {
        match args.timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => break,
            msg = stream.next() => {
                let Some(msg) = msg else { break };
                match msg? {
                    Message::Text(text) => {
                        hub.remote.emit(&text.as_str().to_owned());
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(payload) = out_rx.recv() => {
                stream.send(Message::Text(payload.into())).await?;
            }
        }
    }

    session.detach();
    let stats = session.stats();
    println!(
        "stats sent={} applied={} echoes_dropped={} malformed_dropped={} ignored_kinds={} elements={}",
        stats.sent,
        stats.applied,
        stats.echoes_dropped,
        stats.malformed_dropped,
        stats.ignored_kinds,
        session.tree().len(),
    );
    Ok(())
}

// =============================================================================
// WEBSOCKET HELPERS
// =============================================================================

fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }
    if base.starts_with("ws://") || base.starts_with("wss://") {
        return Ok(format!("{base}/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

async fn recv_text(stream: &mut WsStream, timeout: Duration) -> Result<String, CliError> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(CliError::WsClosed);
            };
            match message? {
                Message::Text(text) => return Ok(text.as_str().to_owned()),
                Message::Close(_) => return Err(CliError::WsClosed),
                _ => {}
            }
        }
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CliError::Timeout)?
}
