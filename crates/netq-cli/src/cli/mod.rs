//! CLI for the netq fetch queue.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use netq_core::{config, Dispatcher};

use commands::{parse_field, run_config, run_get, run_post};

/// Top-level CLI for netq.
#[derive(Debug, Parser)]
#[command(name = "netq")]
#[command(about = "netq: fetch URLs through a bounded, non-blocking worker pool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch one or more URLs as a single group and report each result.
    Get {
        /// HTTP/HTTPS URLs to fetch.
        #[arg(required = true)]
        urls: Vec<String>,
        /// Run at most N transfers at once (overrides `workers` in config.toml).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
        /// Write the response bodies to stdout instead of a summary table.
        #[arg(long)]
        body: bool,
    },

    /// POST a URL-encoded form and print the response body.
    Post {
        /// HTTP/HTTPS URL to post to.
        url: String,
        /// Form field as key=value; repeat for more fields.
        #[arg(long = "field", short = 'f', value_name = "KEY=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        /// Run at most N transfers at once (overrides `workers` in config.toml).
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
    },

    /// Show the config file path and the effective settings.
    Config,
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let mut cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        if let CliCommand::Config = cli.command {
            return run_config(&cfg);
        }
        if let Some(workers) = cli.command.workers() {
            cfg.workers = workers;
        }

        let dispatcher = Dispatcher::with_curl(&cfg);
        let outcome = match cli.command {
            CliCommand::Get { urls, body, .. } => run_get(&dispatcher, urls, body),
            CliCommand::Post { url, fields, .. } => run_post(&dispatcher, url, fields),
            CliCommand::Config => Ok(()),
        };
        // Process exit hook: let running transfers finish, cancel the rest.
        dispatcher.shutdown();
        outcome
    }

    fn workers(&self) -> Option<usize> {
        match self {
            CliCommand::Get { workers, .. } | CliCommand::Post { workers, .. } => *workers,
            CliCommand::Config => None,
        }
    }
}

#[cfg(test)]
mod tests;
