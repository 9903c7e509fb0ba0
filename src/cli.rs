use clap::{Parser, Subcommand};

use crate::provider::Provider;

fn parse_provider(raw: &str) -> Result<Provider, String> {
    raw.parse()
}

#[derive(Debug, Parser)]
#[command(name = "capgate")]
#[command(about = "Credential resolution and AI capability gating")]
pub struct Cli {
    /// Act as this signed-in user. Without it the command runs signed out.
    #[arg(long, global = true, env = "CAPGATE_USER")]
    pub user: Option<String>,
    #[arg(long, global = true)]
    pub email: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capability state, cache flags and preferences after a startup resolution.
    Status,
    /// Resolve a provider through cache, secret store and environment fallback.
    Resolve {
        #[arg(long, value_parser = parse_provider, default_value = "gemini")]
        provider: Provider,
        /// Require the credential value (skips the cache tier).
        #[arg(long)]
        materialize: bool,
    },
    /// Run the capability guard around a no-op action.
    Check,
    /// Store a credential directly, without onboarding.
    Store {
        #[arg(long, value_parser = parse_provider)]
        provider: Provider,
        #[arg(long)]
        key: String,
    },
    /// Which providers have a credential on file for the current user.
    Keys,
    /// Store then validate a credential.
    Onboard {
        #[arg(long, value_parser = parse_provider, default_value = "gemini")]
        provider: Provider,
        #[arg(long, required_unless_present = "skip")]
        key: Option<String>,
        #[arg(long)]
        skip_validation: bool,
        /// Dismiss onboarding without entering a credential.
        #[arg(long, conflicts_with = "key")]
        skip: bool,
    },
    /// Turn AI features off. Without --confirm only the confirmation step is shown.
    Disable {
        #[arg(long)]
        confirm: bool,
    },
    /// Turn AI features back on.
    Enable,
    /// Classify a provider failure.
    Classify {
        #[arg(long, required_unless_present = "status")]
        message: Option<String>,
        /// HTTP status of the failed call; `--message` is then the response body.
        #[arg(long)]
        status: Option<u16>,
    },
    Audit {
        #[arg(long, default_value_t = 200)]
        limit: usize,
        #[arg(long)]
        before_ts_ms: Option<i64>,
    },
}
