// tweetstream: print a live stream as JSON lines.

use std::io::Write;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tweetstream::config;
use tweetstream::core::{BoundingBox, StreamRequest};
use tweetstream::{handler_fn, StreamingConnection};

#[derive(Parser)]
#[command(name = "tweetstream", version, about = "Stream statuses and events as JSON lines")]
struct Cli {
    /// Give up after this many consecutive failed reconnects (overrides config)
    #[arg(long, global = true)]
    max_reconnects: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Public statuses matching the given predicates
    Filter {
        /// Keywords, comma separated or repeated
        #[arg(long, value_delimiter = ',')]
        track: Vec<String>,
        /// User ids, comma separated or repeated
        #[arg(long, value_delimiter = ',')]
        follow: Vec<u64>,
        /// Bounding box "west,south,east,north"; repeat for more boxes
        #[arg(long, value_parser = parse_box)]
        locations: Vec<BoundingBox>,
    },
    /// Random sample of public statuses
    Sample,
    /// The authenticated user's stream
    User {
        /// Also deliver replies between followed users ("all")
        #[arg(long)]
        replies: Option<String>,
    },
}

impl Command {
    fn request(&self) -> anyhow::Result<StreamRequest> {
        match self {
            Command::Filter {
                track,
                follow,
                locations,
            } => {
                if track.is_empty() && follow.is_empty() && locations.is_empty() {
                    anyhow::bail!("filter needs at least one of --track, --follow, --locations");
                }
                let mut req = StreamRequest::filter();
                if !track.is_empty() {
                    req = req.track(track);
                }
                if !follow.is_empty() {
                    req = req.follow(follow);
                }
                if !locations.is_empty() {
                    req = req.locations(locations);
                }
                Ok(req)
            }
            Command::Sample => Ok(StreamRequest::sample()),
            Command::User { replies } => Ok(match replies {
                Some(r) => StreamRequest::user().param("replies", r.as_str()),
                None => StreamRequest::user(),
            }),
        }
    }
}

fn parse_box(s: &str) -> Result<BoundingBox, String> {
    let coords = s
        .split(',')
        .map(|c| c.trim().parse::<f64>().map_err(|e| format!("{c:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match coords[..] {
        [west, south, east, north] => Ok(BoundingBox::new(west, south, east, north)),
        _ => Err(format!("expected 4 coordinates, got {}", coords.len())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load();
    if cli.max_reconnects.is_some() {
        cfg.max_reconnects = cli.max_reconnects;
    }
    if cfg.bearer_token.is_none() {
        anyhow::bail!("no credentials: set TWEETSTREAM_BEARER_TOKEN or bearer_token in the config file");
    }
    let request = cli.command.request()?;
    tracing::info!(host = %request.host, path = %request.path, "starting stream");

    let connection = StreamingConnection::tls(cfg.authorizer(), cfg.connection_options());
    let stop = connection.stop_handle();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::warn!(error = %e, "signal handler failed");
        }
        tracing::info!("shutting down");
        stop.stop();
    });

    let stdout = std::io::stdout();
    connection
        .stream(
            &request,
            handler_fn(move |message| {
                let line = serde_json::to_string(&message)?;
                writeln!(stdout.lock(), "{line}")?;
                Ok(())
            }),
        )
        .await
        .context("stream failed")?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
