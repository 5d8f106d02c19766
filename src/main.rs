use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sliding_quota::config::QuotaConfig;
use sliding_quota::error::QuotaError;
use sliding_quota::ratelimit::{
    sanitize_url, window_from_secs, Admission, FailurePolicy, Identifier, PolicyOverrides,
    RateLimiter, RedisEventStore,
};

/// Exit status for a denied `check`.
const EXIT_DENIED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "sliding-quota", version, about = "Sliding-window rate limit gate")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate one request and record it if admitted
    Check {
        identifier: String,
        /// Override the default request limit
        #[arg(long)]
        limit: Option<u64>,
        /// Override the default window, in seconds
        #[arg(long)]
        window: Option<f64>,
    },
    /// Show the current window usage without recording anything
    Usage {
        identifier: String,
        /// Window in seconds (defaults to the configured window)
        #[arg(long)]
        window: Option<f64>,
    },
    /// Clear the window for an identifier
    Reset { identifier: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON result.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = QuotaConfig::load(cli.config.as_deref())?;
    info!(
        store = %sanitize_url(&config.store.redis_url()),
        key_prefix = %config.store.key_prefix,
        failure_policy = ?config.limits.failure_policy,
        "Configuration loaded"
    );

    let store = match RedisEventStore::connect(&config.store.redis_url(), config.store.timeout())
        .await
    {
        Ok(store) => store,
        Err(error) if error.is_store_unavailable() => {
            if let Command::Check { identifier, .. } = &cli.command {
                let allowed = config.limits.failure_policy == FailurePolicy::Open;
                print_degraded(identifier, allowed, &error);
                return Ok(exit_for(allowed));
            }
            return Err(error.into());
        }
        Err(error) => return Err(error.into()),
    };
    let limiter = RateLimiter::builder(Arc::new(store))
        .defaults(config.default_policy()?)
        .strategy(config.strategy()?)
        .failure_policy(config.limits.failure_policy)
        .key_prefix(config.store.key_prefix.clone())
        .timeout(config.store.timeout())
        .build()?;

    match cli.command {
        Command::Check {
            identifier,
            limit,
            window,
        } => {
            let identifier = Identifier::new(identifier)?;
            let overrides = PolicyOverrides {
                max_requests: limit,
                window: window.map(window_from_secs).transpose()?,
            };

            match limiter.admit_identifier(&identifier, Some(&overrides)).await? {
                Admission::Decided(decision) => {
                    println!(
                        "{}",
                        json!({
                            "identifier": identifier.as_str(),
                            "allowed": decision.allowed,
                            "limit": decision.limit,
                            "remaining": decision.remaining,
                            "reset_at": decision.reset_at_datetime().to_rfc3339(),
                            "retry_after_secs": decision.retry_after_secs(),
                        })
                    );
                    Ok(exit_for(decision.allowed))
                }
                Admission::Degraded { allowed, error } => {
                    print_degraded(identifier.as_str(), allowed, &error);
                    Ok(exit_for(allowed))
                }
            }
        }
        Command::Usage { identifier, window } => {
            let identifier = Identifier::new(identifier)?;
            let window = window.map(window_from_secs).transpose()?;
            let usage = limiter.usage(&identifier, window).await?;

            println!(
                "{}",
                json!({
                    "identifier": identifier.as_str(),
                    "count": usage.count,
                    "reset_at": usage.reset_at.to_datetime().to_rfc3339(),
                    "reset_in_secs": usage.reset_in.as_secs_f64(),
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset { identifier } => {
            let identifier = Identifier::new(identifier)?;
            limiter.reset(&identifier).await?;
            info!(identifier = %identifier, "Window reset");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_degraded(identifier: &str, allowed: bool, error: &QuotaError) {
    println!(
        "{}",
        json!({
            "identifier": identifier,
            "allowed": allowed,
            "degraded": true,
            "error": error.to_string(),
        })
    );
}

fn exit_for(allowed: bool) -> ExitCode {
    if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_DENIED)
    }
}
