//! `tradepost`: drive the settlement engine from the command line.
//!
//! - `run`: execute a JSON command script against a fresh in-memory market
//! - `digest`: compute a commit-reveal digest for a listing pre-image
//! - `inspect`: summarize a saved snapshot

mod runner;
mod script;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tradepost_engine::MarketSnapshot;
use tradepost_types::{Address, CommitmentHash, MarketConfig, TokenId};

use crate::runner::Runner;
use crate::script::{Script, parse_salt};

#[derive(Parser)]
#[command(name = "tradepost")]
#[command(about = "Settlement engine for NFT listings, auctions and commit-reveal listing")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON command script
    Run {
        /// Script file
        script: PathBuf,

        /// Market config (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write a snapshot of the final state here
        #[arg(long)]
        snapshot_out: Option<PathBuf>,
    },

    /// Print the commitment digest for a listing pre-image
    Digest {
        #[arg(long)]
        token: u64,

        /// Listing price (decimal)
        #[arg(long)]
        price: Decimal,

        /// 32-byte salt, hex encoded
        #[arg(long)]
        salt: String,

        /// Committer address (hex)
        #[arg(long)]
        committer: Address,
    },

    /// Summarize a snapshot file
    Inspect {
        snapshot: PathBuf,

        /// Print the full snapshot instead of a summary
        #[arg(long)]
        raw: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run {
            script,
            config,
            snapshot_out,
        } => run_cmd(&script, config.as_deref(), snapshot_out.as_deref()),
        Commands::Digest {
            token,
            price,
            salt,
            committer,
        } => {
            println!("{}", digest_hex(TokenId(token), price, &salt, committer)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect { snapshot, raw } => inspect_cmd(&snapshot, raw),
    }
}

fn run_cmd(path: &Path, config: Option<&Path>, snapshot_out: Option<&Path>) -> Result<ExitCode> {
    let script = Script::load(path)?;
    let config = match config {
        Some(p) => {
            let json = std::fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            MarketConfig::from_json(&json)?
        }
        None => MarketConfig::default(),
    };

    let mut runner = Runner::new(&script, config)?;
    let reports = runner.run_all(&script.steps);
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }

    let failed = reports.iter().filter(|r| r.is_failure()).count();
    info!(steps = reports.len(), failed, "Script finished");

    if let Err(e) = runner.market().verify_invariants() {
        tracing::error!(error = %e, "Invariant check failed after script");
        return Ok(ExitCode::FAILURE);
    }
    if let Some(out) = snapshot_out {
        runner.market().snapshot().save(out)?;
    }
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `0x`-prefixed digest a committer submits before revealing.
fn digest_hex(token: TokenId, price: Decimal, salt: &str, committer: Address) -> Result<String> {
    let salt = parse_salt(salt)?;
    Ok(CommitmentHash::compute(token, price, &salt, committer).to_hex())
}

fn inspect_cmd(path: &Path, raw: bool) -> Result<ExitCode> {
    let snap = MarketSnapshot::load(path)
        .with_context(|| format!("loading snapshot {}", path.display()))?;
    if raw {
        println!("{}", snap.to_json()?);
    } else {
        for line in summarize(&snap) {
            println!("{line}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn summarize(snap: &MarketSnapshot) -> Vec<String> {
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    for listing in &snap.ledger.listings {
        *by_status.entry(listing.status.to_string()).or_default() += 1;
    }
    let withdrawable: Decimal = snap.escrow.withdrawable.values().copied().sum();
    let locked: Decimal = snap.escrow.locked.iter().map(|l| l.amount).sum();

    let mut lines = vec![
        format!("Snapshot taken at {}", snap.taken_at),
        format!("  Owner:          {}", snap.flag.owner),
        format!("  Operator:       {}", snap.operator),
        format!("  Emergency stop: {}", snap.flag.emergency_stop),
        format!("  Fee rate:       {} bps", snap.config.fee_bps),
        format!("  Next listing:   {}", snap.ledger.next_id),
    ];
    lines.extend(
        by_status
            .iter()
            .map(|(status, count)| format!("  {status:<15} {count}")),
    );
    lines.extend([
        format!("  Withdrawable:   {withdrawable}"),
        format!("  Locked:         {locked}"),
        format!("  Protocol fees:  {}", snap.escrow.protocol_fees),
        format!("  Commitments:    {}", snap.commitments.len()),
        format!("  Next event:     {}", snap.next_event_sequence),
    ]);
    lines
}

#[cfg(test)]
mod tests {
    use tradepost_types::Salt;

    use super::*;

    const SELLER: Address = Address([0x01; 20]);

    #[test]
    fn digest_has_single_prefix_and_matches_engine() {
        let salt: Salt = [0x5a; 32];
        let line = digest_hex(TokenId(9), Decimal::new(5, 1), &"5a".repeat(32), SELLER).unwrap();
        assert!(line.starts_with("0x"));
        assert!(!line.starts_with("0x0x"));
        assert_eq!(line.len(), 66);
        let expected = CommitmentHash::compute(TokenId(9), Decimal::new(5, 1), &salt, SELLER);
        assert_eq!(CommitmentHash::from_hex(&line).unwrap(), expected);
        assert!(digest_hex(TokenId(9), Decimal::ONE, "abcd", SELLER).is_err());
    }

    #[test]
    fn summary_counts_state_from_a_scripted_market() {
        let script = Script::from_json(include_str!("../scripts/scenarios.json")).unwrap();
        let mut runner = Runner::new(&script, MarketConfig::default()).unwrap();
        let reports = runner.run_all(&script.steps);
        assert!(reports.iter().all(|r| !r.is_failure()));
        let snap = runner.market().snapshot();

        let lines = summarize(&snap);
        assert!(lines[0].starts_with("Snapshot taken at "));
        assert!(lines.contains(&format!("  Owner:          {}", snap.flag.owner)));
        assert!(lines.contains(&"  Emergency stop: false".to_string()));
        assert!(lines.contains(&"  Fee rate:       250 bps".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("  SOLD ")));
        assert!(lines.iter().any(|l| l.starts_with("  FINALIZED ")));
        assert!(lines.contains(&"  Locked:         0".to_string()));
        assert!(lines.contains(&format!("  Next event:     {}", snap.next_event_sequence)));
    }
}
