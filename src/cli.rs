use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "threadcraft", version, about = "Score threads, post replies, track how they do")]
pub struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `transport=trace`
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score a JSON array of candidate threads
    Score {
        /// File holding `[ScoringCandidate]`
        input: PathBuf,
    },
    /// Score, charge and post one opportunity
    Process {
        /// File holding an `Opportunity`
        input: PathBuf,
    },
    /// Run one scheduled status check on a posted comment
    Track {
        #[arg(long)]
        provider: String,
        #[arg(long)]
        comment_id: String,
        /// Zero-based check index
        #[arg(long, default_value_t = 0)]
        check: usize,
    },
    /// Print the status-check schedule
    Schedule,
    /// Inspect or adjust credit balances
    Credits {
        #[command(subcommand)]
        command: CreditCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum CreditCommands {
    /// Create an account with opening balances
    Open {
        user: String,
        #[arg(long, default_value_t = 0)]
        credits: i64,
        #[arg(long, default_value_t = 0)]
        permanent: i64,
    },
    Balance {
        user: String,
    },
    /// Add permanent credits
    Grant {
        user: String,
        amount: i64,
        #[arg(long)]
        detail: Option<String>,
    },
    Deduct {
        user: String,
        amount: i64,
        #[arg(long)]
        detail: Option<String>,
    },
    /// Reset the expiring balance to a new monthly allowance
    Allowance {
        user: String,
        credits: i64,
    },
    History {
        user: String,
    },
}
