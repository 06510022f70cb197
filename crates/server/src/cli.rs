use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use grantflow_core::Source;

/// Grant capture, scoring and webhook delivery.
#[derive(Parser, Debug)]
#[command(name = "grantflow", version, about = "Capture grants from BOE, BDNS and PLACSP and forward them to a webhook")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server with the sweep loop and scheduled captures (default).
    Serve {
        #[arg(long, env = "HOST")]
        host: Option<String>,
        #[arg(long, env = "PORT")]
        port: Option<u16>,
    },

    /// Run one capture and print its statistics.
    Capture {
        /// boe, bdns or placsp.
        source: Source,

        /// First day of the window (YYYY-MM-DD).
        #[arg(long, env = "CAPTURE_FROM")]
        from: Option<NaiveDate>,

        /// Last day of the window; defaults to today.
        #[arg(long, env = "CAPTURE_TO")]
        to: Option<NaiveDate>,

        /// Days back from `--to` when `--from` is absent.
        #[arg(long, env = "CAPTURE_LOOKBACK_DAYS")]
        lookback_days: Option<u32>,

        #[arg(long, env = "CAPTURE_MAX_RESULTS")]
        max_results: Option<usize>,

        #[arg(long, env = "CAPTURE_MAX_PAGES")]
        max_pages: Option<u32>,

        /// Filter profile to score against; repeat or comma-separate.
        /// Defaults to the source's configured profiles.
        #[arg(long = "profile", env = "CAPTURE_PROFILES", value_delimiter = ',')]
        profiles: Vec<String>,

        /// Skip auto-forwarding of new grants even when AUTO_FORWARD is on.
        #[arg(long, env = "CAPTURE_NO_FORWARD")]
        no_forward: bool,
    },

    /// Re-attempt due delivery retries once.
    Sweep {
        #[arg(long, env = "SWEEP_LIMIT")]
        limit: Option<usize>,
    },

    /// Manage the filter profile document.
    Profiles {
        #[command(subcommand)]
        action: ProfilesCommand,
    },

    /// Deliver one grant now.
    Deliver {
        grant_id: String,

        /// Resend on a fresh sequence even if already delivered.
        #[arg(long, env = "DELIVER_FORCE")]
        force: bool,
    },

    /// Print the active configuration with secrets redacted.
    Config,
}

#[derive(Subcommand, Debug)]
pub enum ProfilesCommand {
    /// Add the built-in profiles that are missing and save.
    Init,
    /// List profile names with their rule counts and thresholds.
    List,
    /// Print one profile as JSON.
    Show { name: String },
}
