//! # DCSN CLI Entry Point
//!
//! Command-line front end for the collective-signing service.
//!
//! Running without a subcommand defaults to `run` (starts the HTTP
//! service). All flags have environment-variable fallbacks; CLI flags
//! take precedence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dcsn_common::Policy;
use dcsn_service::{
    build_router, ServiceConfig, SigningService, SERVICE_NAME, SERVICE_VERSION,
};

// ════════════════════════════════════════════════════════════════════════════
// CLI DEFINITIONS (clap)
// ════════════════════════════════════════════════════════════════════════════

/// DCSN — Distributed Collective Signing Network
///
/// A roster of N signers jointly produces one compact Schnorr signature
/// per proposal, tolerating unresponsive subleaders and leaves.
#[derive(Parser)]
#[command(
    name = "dcsn",
    version,
    about = "DCSN — Distributed Collective Signing Network",
    long_about = "Collective signing service: a roster of N signers jointly produces\n\
                  one compact Schnorr signature per proposal, tolerating unresponsive\n\
                  subleaders and leaves.\n\n\
                  Running without a subcommand defaults to 'run' (starts the service)."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP signing service
    Run(RunArgs),

    /// Run a single signing round locally and print the signature
    Sign(SignArgs),

    /// Show build and configuration info
    Info,

    /// Show version string
    Version,
}

/// Arguments shared by `run` and `sign`.
#[derive(Args, Clone)]
struct RosterArgs {
    /// Number of signers in the local roster
    #[arg(long, env = "DCSN_SIGNERS", default_value_t = 5)]
    signers: usize,

    /// Requested number of subtrees (fan-out K)
    #[arg(long, env = "DCSN_SUBTREES", default_value_t = 2)]
    subtrees: usize,

    /// Whole-round deadline in milliseconds (0 = default)
    #[arg(long, env = "DCSN_PROTOCOL_TIMEOUT_MS", default_value_t = 0)]
    protocol_timeout_ms: u64,

    /// Per-subleader deadline in milliseconds (0 = default)
    #[arg(long, env = "DCSN_SUBLEADER_TIMEOUT_MS", default_value_t = 0)]
    subleader_timeout_ms: u64,

    /// Per-leaf deadline in milliseconds (0 = default)
    #[arg(long, env = "DCSN_LEAVES_TIMEOUT_MS", default_value_t = 0)]
    leaves_timeout_ms: u64,
}

impl RosterArgs {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            n_subtrees: self.subtrees,
            protocol_timeout: Duration::from_millis(self.protocol_timeout_ms),
            subleader_timeout: Duration::from_millis(self.subleader_timeout_ms),
            leaves_timeout: Duration::from_millis(self.leaves_timeout_ms),
        }
    }
}

impl Default for RosterArgs {
    fn default() -> Self {
        Self {
            signers: 5,
            subtrees: 2,
            protocol_timeout_ms: 0,
            subleader_timeout_ms: 0,
            leaves_timeout_ms: 0,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    roster: RosterArgs,

    /// HTTP listen port
    #[arg(long, env = "DCSN_HTTP_PORT", default_value_t = 46271)]
    http_port: u16,
}

#[derive(Args)]
struct SignArgs {
    #[command(flatten)]
    roster: RosterArgs,

    /// Proposal to sign (UTF-8 text)
    #[arg(long, conflicts_with = "proposal_hex")]
    proposal: Option<String>,

    /// Proposal to sign (hex bytes)
    #[arg(long)]
    proposal_hex: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ════════════════════════════════════════════════════════════════════════════

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command.unwrap_or_else(|| {
        Command::Run(RunArgs {
            roster: RosterArgs::default(),
            http_port: 46271,
        })
    }) {
        Command::Run(args) => run_service(args).await,
        Command::Sign(args) => run_sign(args).await,
        Command::Info => {
            println!("{} {}", SERVICE_NAME, SERVICE_VERSION);
            println!("defaults: 5 signers, 2 subtrees, port 46271");
            Ok(())
        }
        Command::Version => {
            println!("{} {}", SERVICE_NAME, SERVICE_VERSION);
            Ok(())
        }
    }
}

async fn run_service(args: RunArgs) -> anyhow::Result<()> {
    let service = SigningService::new(args.roster.signers, args.roster.service_config())
        .context("failed to build the signing service")?;
    let service = Arc::new(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    info!(
        %addr,
        signers = args.roster.signers,
        subtrees = args.roster.subtrees,
        "starting signing service"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("http server failed")?;
    Ok(())
}

async fn run_sign(args: SignArgs) -> anyhow::Result<()> {
    let proposal = match (&args.proposal, &args.proposal_hex) {
        (Some(text), _) => text.clone().into_bytes(),
        (None, Some(hex_str)) => hex::decode(hex_str).context("invalid --proposal-hex")?,
        (None, None) => anyhow::bail!("either --proposal or --proposal-hex is required"),
    };

    let service = SigningService::new(args.roster.signers, args.roster.service_config())
        .context("failed to build the signing service")?;
    let outcome = service
        .sign_proposal(proposal.clone())
        .await
        .context("signing round failed")?;

    println!("signature: {}", hex::encode(&outcome.signature));
    println!(
        "participants: {}/{}",
        outcome.participants, outcome.total
    );

    let complete = service
        .verify_signature(&proposal, &outcome.signature, &Policy::Complete)
        .is_ok();
    let threshold = service
        .verify_signature(
            &proposal,
            &outcome.signature,
            &Policy::Threshold(outcome.participants),
        )
        .is_ok();
    println!("verify(complete): {}", if complete { "ok" } else { "failed" });
    println!(
        "verify(threshold {}): {}",
        outcome.participants,
        if threshold { "ok" } else { "failed" }
    );
    Ok(())
}
