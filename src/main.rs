use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use story_tree_nav::{
    config::{Config, LogFormat, LoggingConfig},
    model::Reply,
    quote::{self, RawSelection},
    AppError, DuplicateAggregator, NavigationOutcome, StoryApiClient, StoryDataSource,
    StorySession,
};

/// Read branching stories level by level.
#[derive(Parser, Debug)]
#[command(name = "story-nav", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the level chain under a root post
    Levels {
        /// Root post id
        root: String,

        /// Stop once this many levels are loaded
        #[arg(long, default_value = "10")]
        max_levels: u32,
    },

    /// Load down to a level, focus a sibling there and load under it
    Select {
        /// Root post id
        root: String,

        /// 1-based level number
        level: u32,

        /// Sibling node id to focus
        node: String,
    },

    /// Show the ranked duplicate group of a reply
    Duplicates {
        /// Original reply id
        reply_id: String,

        /// Similarity threshold, defaults to DUPLICATE_THRESHOLD
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Resolve a quote over a piece of text
    Quote {
        /// Plain text of the node
        text: String,

        /// Start offset in characters
        #[arg(long)]
        start: usize,

        /// End offset in characters (exclusive)
        #[arg(long)]
        end: usize,

        /// Rendered markup the offsets refer to, instead of the plain text
        #[arg(long)]
        markup: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Quote resolution is offline and runs without service configuration
    let command = match cli.command {
        Command::Quote {
            text,
            start,
            end,
            markup,
        } => {
            init_logging(&LoggingConfig::default());
            return run_quote(&text, start, end, markup);
        }
        command => command,
    };

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "story-nav starting");

    let client = match StoryApiClient::new(&config.api, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.api.base_url, "Story service client initialized");
            c.with_pagination(&config.pagination)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize story service client");
            return Err(e.into());
        }
    };
    let source: Arc<dyn StoryDataSource> = Arc::new(client);

    match command {
        Command::Levels { root, max_levels } => {
            let session = StorySession::open(source, &root).await?;
            session.load_until(max_levels).await?;
            print_json(&session.snapshot().await)
        }
        Command::Select { root, level, node } => {
            let session = StorySession::open(source, &root).await?;
            if !session.load_until(level).await? {
                anyhow::bail!("story under {} has fewer than {} levels", root, level);
            }
            let index = level.saturating_sub(1) as usize;
            match session.select_sibling(index, &node).await? {
                NavigationOutcome::Unchanged => {
                    info!(node_id = %node, "Focus unchanged");
                }
                NavigationOutcome::Refocused { load } => {
                    load.context("loading levels under the new focus")?;
                }
            }
            print_json(&session.snapshot().await)
        }
        Command::Duplicates {
            reply_id,
            threshold,
        } => {
            let node = source
                .fetch_node(&reply_id)
                .await?
                .ok_or_else(|| AppError::NotFound {
                    resource: "Reply".to_string(),
                    id: reply_id.clone(),
                })?;
            let original = Reply::from_node(&node)
                .with_context(|| format!("node {} does not quote a parent", reply_id))?;

            let aggregator = DuplicateAggregator::new(Arc::clone(&source), &config.duplicates);
            let ranked = aggregator
                .load_group_with_threshold(original, threshold.unwrap_or(aggregator.threshold()))
                .await?;
            for violation in &ranked.violations {
                eprintln!("excluded: {}", violation);
            }
            print_json(&ranked.group.view())
        }
        Command::Quote { .. } => Ok(()),
    }
}

fn run_quote(text: &str, start: usize, end: usize, markup: Option<String>) -> anyhow::Result<()> {
    let selection = match markup {
        Some(markup) => RawSelection::Rendered { markup, start, end },
        None => RawSelection::Plain { start, end },
    };
    let resolved = quote::resolve(text, &selection, None)?;
    print_json(&resolved)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
