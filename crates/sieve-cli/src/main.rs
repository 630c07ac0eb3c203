//! sieve CLI
//!
//! Compiles filter lists into declarative rulesets and manages a local
//! blocker state (custom filters, whitelist, list refresh).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use sieve_compiler::{compile_filter_list, parse_filter};
use sieve_core::ids::{static_list_window, Tier};
use sieve_sync::{
    Adapters, Blocker, HttpFetcher, JsonFileStore, RefreshReport, RulesetDirEngine, SyncConfig,
};

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Filter list to declarative rule compiler")]
struct Cli {
    #[command(flatten)]
    state: StateArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StateArgs {
    /// Sync configuration (JSON); built-in lists when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Persisted blocker state
    #[arg(long, global = true, default_value = "sieve-state.json")]
    state: PathBuf,

    /// Directory the rulesets are written to
    #[arg(long, global = true, default_value = "rulesets")]
    rulesets: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a single filter and print the resulting rule
    Parse {
        filter: String,

        /// Rule id to assign
        #[arg(long, default_value_t = 1)]
        id: u32,
    },

    /// Compile filter list files into static rulesets
    Compile {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output directory
        #[arg(short, long, default_value = "rulesets")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Refresh static filter lists that are due
    Refresh {
        /// Refresh every list regardless of its last update
        #[arg(short, long)]
        force: bool,
    },

    /// Manage custom filters
    Custom {
        #[command(subcommand)]
        action: CustomAction,
    },

    /// Add a domain to the whitelist, or remove it if present
    Whitelist { domain: String },

    /// Turn blocking, or a single list, on
    Enable {
        #[arg(long)]
        list: Option<String>,
    },

    /// Turn blocking, or a single list, off
    Disable {
        #[arg(long)]
        list: Option<String>,
    },

    /// Show lists, rule counts and state
    Stats,
}

#[derive(Subcommand)]
enum CustomAction {
    Add { filter: String },
    Remove { id: u32 },
    List,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Parse { filter, id } => cmd_parse(&filter, id),
        Commands::Compile {
            input,
            output,
            verbose,
        } => cmd_compile(&input, &output, verbose),
        Commands::Refresh { force } => cmd_refresh(&cli.state, force).await,
        Commands::Custom { action } => cmd_custom(&cli.state, action).await,
        Commands::Whitelist { domain } => cmd_whitelist(&cli.state, &domain).await,
        Commands::Enable { list } => cmd_set_enabled(&cli.state, list.as_deref(), true).await,
        Commands::Disable { list } => cmd_set_enabled(&cli.state, list.as_deref(), false).await,
        Commands::Stats => cmd_stats(&cli.state).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn open_blocker(args: &StateArgs) -> Result<(Blocker, Arc<RulesetDirEngine>), String> {
    let config = match &args.config {
        Some(path) => SyncConfig::load(path).map_err(|e| e.to_string())?,
        None => SyncConfig::default(),
    };

    let engine = Arc::new(RulesetDirEngine::new(&args.rulesets));
    let storage = Arc::new(JsonFileStore::new(&args.state));
    let fetcher = HttpFetcher::new().map_err(|e| format!("Failed to create HTTP client: {}", e))?;
    let adapters = Adapters::new(engine.clone(), storage, Arc::new(fetcher));

    let mut blocker = Blocker::new(config, adapters).map_err(|e| e.to_string())?;
    blocker
        .restore()
        .await
        .map_err(|e| format!("Failed to restore state: {}", e))?;
    Ok((blocker, engine))
}

fn cmd_parse(filter: &str, id: u32) -> Result<(), String> {
    let rule = parse_filter(filter, id).map_err(|e| format!("Rejected: {}", e))?;
    let json = serde_json::to_string_pretty(&rule).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn cmd_compile(inputs: &[String], output: &str, verbose: bool) -> Result<(), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    fs::create_dir_all(output).map_err(|e| format!("Failed to create '{}': {}", output, e))?;

    let mut total_lines = 0usize;
    let mut total_rules = 0usize;
    let mut total_rejected = 0usize;

    for (index, path) in inputs.iter().enumerate() {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read '{}': {}", path, e))?;

        let window = static_list_window(index, inputs.len());
        let compiled = compile_filter_list(&content, window);
        let stats = &compiled.stats;
        total_lines += stats.lines;
        total_rules += stats.rules;
        total_rejected += stats.rejected();

        let stem = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("list");
        let out_path = Path::new(output).join(format!("{}.json", stem));
        let json = serde_json::to_vec_pretty(&compiled.rules).map_err(|e| e.to_string())?;
        fs::write(&out_path, json)
            .map_err(|e| format!("Failed to write '{}': {}", out_path.display(), e))?;

        if verbose {
            println!(
                "  [{}] {} - {} lines, {} rules (ids {}), {} cosmetic, {} unsupported, {} duplicates, {} truncated",
                index,
                stem,
                stats.lines,
                stats.rules,
                window,
                stats.cosmetic,
                stats.unsupported,
                stats.duplicates,
                stats.truncated
            );
        }
    }

    println!("Compiled {} filter lists to '{}'", inputs.len(), output);
    println!("  Lines:    {}", total_lines);
    println!("  Rules:    {} ({} rejected)", total_rules, total_rejected);
    println!("  Time:     {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    Ok(())
}

fn print_report(report: &RefreshReport) {
    for id in &report.succeeded {
        println!("  updated   {}", id);
    }
    for id in &report.skipped {
        println!("  skipped   {}", id);
    }
    for (id, reason) in &report.failed {
        println!("  failed    {} ({})", id, reason);
    }
    if let Some(e) = &report.persist_error {
        println!("  state not saved ({})", e);
    }
}

async fn cmd_refresh(args: &StateArgs, force: bool) -> Result<(), String> {
    let (mut blocker, _) = open_blocker(args).await?;
    let report = if force {
        blocker.refresh_static_lists().await
    } else {
        blocker.refresh_due_lists().await
    }
    .map_err(|e| e.to_string())?;

    print_report(&report);
    if !report.failed.is_empty() {
        return Err(format!("{} filter lists failed to refresh", report.failed.len()));
    }
    if let Some(e) = report.persist_error {
        return Err(format!("Failed to save filter list state: {}", e));
    }
    Ok(())
}

async fn cmd_custom(args: &StateArgs, action: CustomAction) -> Result<(), String> {
    let (mut blocker, _) = open_blocker(args).await?;
    match action {
        CustomAction::Add { filter } => {
            let id = blocker
                .add_custom_filter(&filter)
                .await
                .map_err(|e| e.to_string())?;
            println!("Added custom filter {} as rule {}", filter.trim(), id);
        }
        CustomAction::Remove { id } => {
            let removed = blocker
                .remove_custom_filter(id)
                .await
                .map_err(|e| e.to_string())?;
            println!("Removed custom filter {}", removed.filter);
        }
        CustomAction::List => {
            for custom in blocker.custom_filters() {
                println!("{:>8}  {}", custom.id, custom.filter);
            }
        }
    }
    Ok(())
}

async fn cmd_whitelist(args: &StateArgs, domain: &str) -> Result<(), String> {
    let (mut blocker, _) = open_blocker(args).await?;
    let added = blocker
        .toggle_whitelist(domain)
        .await
        .map_err(|e| e.to_string())?;
    if added {
        println!("Whitelisted {}", domain);
    } else {
        println!("Removed {} from the whitelist", domain);
    }
    Ok(())
}

async fn cmd_set_enabled(args: &StateArgs, list: Option<&str>, enabled: bool) -> Result<(), String> {
    let (mut blocker, _) = open_blocker(args).await?;
    let state = if enabled { "enabled" } else { "disabled" };
    match list {
        Some(id) => {
            blocker
                .set_list_enabled(id, enabled)
                .await
                .map_err(|e| e.to_string())?;
            println!("List {} {}", id, state);
        }
        None => {
            blocker
                .set_enabled(enabled)
                .await
                .map_err(|e| e.to_string())?;
            println!("Blocking {}", state);
        }
    }
    Ok(())
}

async fn cmd_stats(args: &StateArgs) -> Result<(), String> {
    let (blocker, engine) = open_blocker(args).await?;

    println!("Blocking:    {}", if blocker.is_enabled() { "on" } else { "off" });
    println!();
    println!("Filter lists:");
    for list in blocker.filter_lists() {
        let active = engine
            .rules(&list.tier())
            .await
            .map_err(|e| e.to_string())?
            .len();
        let updated = list
            .last_update
            .map_or_else(|| "never".to_string(), |ms| format!("{}", ms));
        println!(
            "  {:<12} {:<8} ids {:<16} {:>6} rules  updated {}",
            list.id,
            if list.enabled { "on" } else { "off" },
            list.window.to_string(),
            active,
            updated
        );
    }
    println!();
    println!("Custom:      {} filters", blocker.compiled_rule_count(&Tier::Dynamic));
    println!("Whitelist:   {} domains", blocker.whitelist().len());

    Ok(())
}
