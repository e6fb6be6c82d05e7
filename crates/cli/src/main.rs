use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::{logging, prompt, report};
use std::io::{self, Write};
use sweeper_core::config::{self, AppConfig};
use sweeper_core::pipeline;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Scan { json } => run_scan(cfg, json).await,
        Commands::Run {
            apply,
            workers,
            remove,
            yes,
            json,
        } => run_cleanup(cfg, apply, workers, remove, yes, json).await,
        Commands::Ledger { run, json } => run_ledger(cfg, run, json).await,
    }
}

#[derive(Parser)]
#[command(name = "sweeper")]
#[command(about = "Classify cache, log and temp files and move the disposable ones to a backup", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan and filter only; list the files that would be classified
    Scan {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan, classify, review and move approved files to the backup directory
    Run {
        /// Actually move files (otherwise the configured dry-run setting applies)
        #[arg(long, default_value_t = false)]
        apply: bool,
        /// Override the number of classification workers
        #[arg(long)]
        workers: Option<usize>,
        /// Bucket to remove, as PROGRAM:LABEL or PROGRAM:LABEL:LEVEL[,LEVEL]; repeatable.
        /// Skips the interactive review
        #[arg(long, value_name = "PROGRAM:LABEL[:LEVEL,...]")]
        remove: Vec<String>,
        /// Do not ask for final confirmation
        #[arg(long, default_value_t = false)]
        yes: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// List backup ledger entries for manual restoration
    Ledger {
        /// Only show entries of this run id
        #[arg(long)]
        run: Option<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_scan(cfg: AppConfig, json: bool) -> Result<()> {
    let (records, stats) = pipeline::scan(&cfg).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report::scan_json(&records, &stats))?
        );
    } else {
        print!("{}", report::scan_text(&records, &stats));
    }
    Ok(())
}

async fn run_cleanup(
    mut cfg: AppConfig,
    apply: bool,
    workers: Option<usize>,
    remove: Vec<String>,
    yes: bool,
    json: bool,
) -> Result<()> {
    if let Some(n) = workers {
        cfg.classifier.workers = n.max(1);
    }
    let dry_run = cfg.safety.dry_run && !apply;
    let registry = pipeline::build_registry(&cfg);
    let mut run = pipeline::classify(&cfg, &registry).await?;

    // Keep stdout clean for JSON consumers.
    let mut out: Box<dyn Write> = if json {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };
    if !json {
        write!(out, "{}", report::scan_errors_text(&run.stats))?;
        write!(out, "{}", report::buckets_text(&run.session))?;
        write!(out, "{}", report::unknowns_text(&run.session))?;
    }

    if run.session.is_empty() {
        info!("Nothing to review");
    } else if !remove.is_empty() {
        prompt::apply_removals(&mut run.session, &remove)?;
    } else {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        prompt::collect_decisions(&mut run.session, &mut input, &mut out)?;
    }

    let selected = run.session.resolved_deletion_set();
    if selected.is_empty() {
        writeln!(out, "No files selected for removal.")?;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report::run_json(&run.stats, &run.session, None))?
            );
        }
        return Ok(());
    }

    if !dry_run && !yes {
        let total: u64 = selected.iter().map(|r| r.size).sum();
        let question = format!(
            "Move {} files ({:.2} MB) to {}?",
            selected.len(),
            total as f64 / (1024.0 * 1024.0),
            cfg.backup_dir().display()
        );
        let stdin = io::stdin();
        let mut input = stdin.lock();
        if !prompt::confirm(&question, &mut input, &mut out)? {
            writeln!(out, "Aborted; nothing was moved.")?;
            return Ok(());
        }
    }

    let commit = pipeline::commit(&cfg, &run.session, dry_run).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report::run_json(
                &run.stats,
                &run.session,
                Some(&commit)
            ))?
        );
    } else {
        write!(out, "{}", report::commit_text(&commit))?;
    }
    Ok(())
}

async fn run_ledger(cfg: AppConfig, run: Option<String>, json: bool) -> Result<()> {
    let ledger = pipeline::open_ledger(&cfg).await?;
    let rows = ledger.entries(run.as_deref()).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report::ledger_json(&rows))?
        );
    } else {
        print!("{}", report::ledger_text(&rows));
    }
    Ok(())
}
