//! ABU CLI
//!
//! Compile filter lists, query the resulting request filter and run the
//! filter service's update check from the command line.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;

use abu_compiler::{compile_filter_list, dedup_rules};
use abu_core::blocking::{self, get_blocked_response_by_rule, BlockedResponse};
use abu_core::rule::FilterRule;
use abu_core::types::ANTI_CIRCUMVENTION;
use abu_core::{FilterId, RequestFilter, RequestType, WhitelistEngine};
use abu_service::{AntiBannerService, ServiceConfig};

#[derive(Parser)]
#[command(name = "abu-cli")]
#[command(about = "ABU filter list compiler and tools")]
struct Cli {
    /// Log level (RUST_LOG overrides it)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists and report rule counts
    Compile {
        /// Input filter list files, numbered from 1 in order
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Find the rule governing one request
    Check {
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Request URL
        #[arg(short, long)]
        url: String,

        /// URL of the page making the request
        #[arg(short, long)]
        document: String,

        /// Request type as the browser names it (script, image, main_frame...)
        #[arg(short = 't', long = "type", default_value = "other")]
        request_type: String,

        /// Whitelisted domains
        #[arg(short, long)]
        whitelist: Vec<String>,
    },

    /// Print the CSS and scripts a page gets
    Selectors {
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Page URL
        #[arg(short, long)]
        url: String,

        /// Include extended CSS
        #[arg(long)]
        extended: bool,
    },

    /// Start the filter service, check for updates and stop
    Update {
        /// Service configuration file
        #[arg(short, long, default_value = abu_service::config::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Only check these filter ids
        #[arg(short, long)]
        filter: Vec<FilterId>,
    },
}

fn main() {
    let cli = Cli::parse();
    abu_service::init_logging(cli.log_level.parse().unwrap_or(log::LevelFilter::Warn));

    let result = match cli.command {
        Commands::Compile { input, verbose } => cmd_compile(&input, verbose),
        Commands::Check {
            input,
            url,
            document,
            request_type,
            whitelist,
        } => cmd_check(&input, &url, &document, &request_type, &whitelist),
        Commands::Selectors { input, url, extended } => cmd_selectors(&input, &url, extended),
        Commands::Update { config, filter } => cmd_update(&config, &filter),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

struct BuildStats {
    lines: usize,
    rules: usize,
    dropped: usize,
    deduped: usize,
}

/// Compile `inputs` into one request filter, first list winning duplicates.
fn build_filter(inputs: &[String], verbose: bool) -> Result<(RequestFilter, BuildStats), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let mut filter = RequestFilter::new();
    let mut seen = HashSet::new();
    let mut stats = BuildStats {
        lines: 0,
        rules: 0,
        dropped: 0,
        deduped: 0,
    };

    for (index, path) in inputs.iter().enumerate() {
        let filter_id = FilterId::try_from(index + 1).map_err(|_| "Too many input files".to_string())?;
        let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;

        let line_count = content.lines().count();
        let mut compiled = compile_filter_list(content.lines(), filter_id);
        let dedup = dedup_rules(&mut compiled.rules, &mut seen);

        if verbose {
            println!(
                "  [{}] {} - {} lines, {} rules, {} dropped, {} duplicates",
                filter_id,
                Path::new(path).file_name().unwrap_or_default().to_string_lossy(),
                line_count,
                dedup.after,
                compiled.dropped,
                dedup.deduped
            );
        }

        stats.lines += line_count;
        stats.rules += dedup.after;
        stats.dropped += compiled.dropped;
        stats.deduped += dedup.deduped;
        for rule in compiled.rules {
            filter.add_rule(rule, filter_id != ANTI_CIRCUMVENTION);
        }
    }

    Ok((filter, stats))
}

fn cmd_compile(inputs: &[String], verbose: bool) -> Result<(), String> {
    let start = Instant::now();
    let (filter, stats) = build_filter(inputs, verbose)?;
    let total_time = start.elapsed();

    println!("Compiled {} filter lists", inputs.len());
    println!("  Lines:      {}", stats.lines);
    println!("  Rules:      {} (counted {})", stats.rules, filter.rules_count());
    println!("  Dropped:    {}", stats.dropped);
    println!("  Duplicates: {}", stats.deduped);
    println!("  Time:       {:.1}ms", total_time.as_secs_f64() * 1000.0);

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckReport {
    blocked: bool,
    response: Option<BlockedResponse>,
    rule: Option<String>,
    filter_id: Option<FilterId>,
}

fn cmd_check(
    inputs: &[String],
    url: &str,
    document: &str,
    request_type: &str,
    whitelist: &[String],
) -> Result<(), String> {
    let (filter, _) = build_filter(inputs, false)?;
    let whitelist = WhitelistEngine::with_domains(whitelist);
    let request_type = RequestType::from_browser_type(request_type);

    let rule = blocking::get_rule_for_request(&filter, &whitelist, url, document, request_type, None);
    let response = get_blocked_response_by_rule(rule.as_deref());
    let report = CheckReport {
        blocked: response.is_some(),
        response,
        rule: rule.as_ref().map(|r| r.rule_text().to_string()),
        filter_id: rule.as_ref().map(|r| r.filter_id()),
    };

    let json = serde_json::to_string_pretty(&report).map_err(|e| format!("Failed to serialize: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn cmd_selectors(inputs: &[String], url: &str, extended: bool) -> Result<(), String> {
    let (filter, _) = build_filter(inputs, false)?;
    let result = blocking::get_selectors_and_scripts(&filter, url, None, extended, false);

    let json = serde_json::to_string_pretty(&result).map_err(|e| format!("Failed to serialize: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn cmd_update(config_path: &str, only: &[FilterId]) -> Result<(), String> {
    let config = if Path::new(config_path).exists() {
        ServiceConfig::load_from_file(config_path).map_err(|e| format!("Failed to load '{}': {}", config_path, e))?
    } else {
        log::warn!("Config file '{}' not found, using defaults", config_path);
        ServiceConfig::default()
    };

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))?;
    runtime.block_on(async {
        let service = AntiBannerService::with_config(config).map_err(|e| e.to_string())?;
        service.start().await.map_err(|e| format!("Failed to start: {}", e))?;

        let only = if only.is_empty() { None } else { Some(only) };
        let updated = service
            .check_filters_updates(only)
            .await
            .map_err(|e| format!("Update check failed: {}", e))?;

        service.wait_for_pending_changes().await;

        println!("Updated filters: {:?}", updated);
        println!("  Enabled:  {}", service.get_enabled_filters().len());
        println!("  Rules:    {}", service.rules_count());
        service.stop();
        Ok::<(), String>(())
    })
}
