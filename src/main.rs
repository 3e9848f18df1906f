use anyhow::{Context, Result};
use background_service::{
    summarize, Opportunity, PerformanceTracker, Pipeline, TRACKING_SCHEDULE,
};
use chrono::Utc;
use clap::Parser;
use database::{Database, DeductOptions};
use llm_interface::{OpenAiCompatibleClient, RelevanceScorer};
use posting_providers::{HttpPostingProvider, ProviderRegistry};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use threadcraft_core::{
    AppConfig, CreditReason, ErrorExt, ErrorReporter, ScoringCandidate, TrackedComment,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use transport::{RateLimiter, ReqwestExecutor, RetryingTransport, SqliteWindowStore};

mod cli;

use cli::{Cli, Commands, CreditCommands};

const USER_AGENT: &str = concat!("threadcraft/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

struct Services {
    config: AppConfig,
    db: Database,
    registry: Arc<ProviderRegistry>,
    scorer: RelevanceScorer,
}

impl Services {
    async fn build(config: AppConfig) -> Result<Self> {
        let db = Database::open(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?;

        let limiter = if config.rate_limit_store_url == "memory" {
            RateLimiter::in_memory()
        } else {
            let store = SqliteWindowStore::connect(&config.rate_limit_store_url)
                .await
                .with_context(|| format!("opening {}", config.rate_limit_store_url))?;
            RateLimiter::new(Arc::new(store))
        };
        let executor = Arc::new(ReqwestExecutor::new(USER_AGENT, HTTP_TIMEOUT)?);
        let transport = RetryingTransport::new(executor, limiter);

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(HttpPostingProvider::from_settings(
            &config.provider,
            transport.clone(),
        )?))?;

        let client = OpenAiCompatibleClient::new(config.llm.clone(), transport);
        let mut scorer =
            RelevanceScorer::new(Arc::new(client)).with_temperature(config.llm.temperature);
        if let Some(max_tokens) = config.llm.max_tokens {
            scorer = scorer.with_max_tokens(max_tokens);
        }

        Ok(Self {
            config,
            db,
            registry: Arc::new(registry),
            scorer,
        })
    }

    fn pipeline(&self) -> Result<Pipeline> {
        Ok(Pipeline::new(
            self.scorer.clone(),
            self.db.credits()?,
            self.registry.clone(),
            self.config.pipeline.clone(),
        ))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_credits(db: &Database, command: CreditCommands) -> Result<()> {
    let ledger = db.credits()?;
    match command {
        CreditCommands::Open {
            user,
            credits,
            permanent,
        } => print_json(&ledger.open_account(&user, credits, permanent).await?),
        CreditCommands::Balance { user } => {
            let account = ledger.balance(&user).await?;
            print_json(&json!({
                "credits": account.credits,
                "permanent_credits": account.permanent_credits,
                "available": account.available()?,
            }))
        }
        CreditCommands::Grant {
            user,
            amount,
            detail,
        } => print_json(
            &ledger
                .grant_permanent(&user, amount, CreditReason::PermanentPurchase, detail.as_deref())
                .await?,
        ),
        CreditCommands::Deduct {
            user,
            amount,
            detail,
        } => {
            let mut options = DeductOptions::non_throwing();
            options.detail = detail;
            print_json(
                &ledger
                    .deduct(&user, amount, CreditReason::AdminAdjustment, options)
                    .await?,
            )
        }
        CreditCommands::Allowance { user, credits } => {
            print_json(&ledger.set_monthly_allowance(&user, credits).await?)
        }
        CreditCommands::History { user } => print_json(&ledger.entries(&user).await?),
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Schedule = cli.command {
        let mut elapsed = Duration::ZERO;
        for (index, delay) in TRACKING_SCHEDULE.iter().enumerate() {
            elapsed += *delay;
            println!(
                "check {}: {}h after the previous one, {}h after posting",
                index,
                delay.as_secs() / 3600,
                elapsed.as_secs() / 3600
            );
        }
        return Ok(());
    }

    let config = AppConfig::load(cli.config.as_deref())?;

    if let Commands::Credits { command } = cli.command {
        let db = Database::open(&config.database_url).await?;
        return run_credits(&db, command).await;
    }

    let services = Services::build(config).await?;
    match cli.command {
        Commands::Score { input } => {
            let candidates: Vec<ScoringCandidate> = read_json(&input)?;
            let urls: Vec<String> = candidates.iter().map(|c| c.url.clone()).collect();
            let results = services.pipeline()?.score_batch(candidates).await;

            let reporter = ErrorReporter::new();
            let report: Vec<_> = urls
                .iter()
                .zip(results)
                .map(|(url, result)| match result {
                    Ok(scoring) => json!({ "url": url, "scoring": scoring }),
                    Err(e) => {
                        reporter.report_warning(&e);
                        json!({
                            "url": url,
                            "error": e.user_friendly_message(),
                            "code": e.error_code(),
                        })
                    }
                })
                .collect();
            print_json(&report)
        }
        Commands::Process { input } => {
            let opportunity: Opportunity = read_json(&input)?;
            let outcome = services.pipeline()?.process(&opportunity).await?;
            print_json(&outcome)
        }
        Commands::Track {
            provider,
            comment_id,
            check,
        } => {
            let comment = TrackedComment {
                provider_name: provider,
                comment_id,
                posted_at: Utc::now(),
            };
            let store = services.db.snapshots()?;
            let tracker =
                PerformanceTracker::new(services.registry.clone()).with_store(store.clone());

            let outcome = tracker.run_check(&comment, check).await?;
            let history = store.history(&comment).await?;
            print_json(&json!({
                "snapshot": outcome.snapshot,
                "next_check_in_secs": outcome.next_delay.map(|d| d.as_secs()),
                "summary": summarize(&history),
            }))
        }
        Commands::Schedule | Commands::Credits { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting threadcraft {}", env!("CARGO_PKG_VERSION"));
    run(cli).await
}
