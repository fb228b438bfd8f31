//! listwarden CLI
//!
//! CLI tool for compiling filter lists, inspecting compiled rulesets and
//! keeping a set of list sources up to date.

mod config;
mod watch;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{ArgAction, Parser, Subcommand};
use env_logger::{Builder, Env};

use lw_compiler::{parse_content, save_ruleset, sniff_content};
use lw_core::ruleset::{strip_header, RulesetView, SectionId};
use lw_core::ruleset_checksum;

#[derive(Parser)]
#[command(name = "lw-cli")]
#[command(about = "listwarden filter list compiler and tools")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a text filter list or tracker blocklist into a ruleset
    Compile {
        /// Input list file
        #[arg(short, long)]
        input: PathBuf,

        /// Output ruleset file
        #[arg(short, long, default_value = "ruleset.dat")]
        output: PathBuf,

        /// Accept ABP `#$#` snippet rules
        #[arg(long)]
        allow_abp_snippets: bool,
    },

    /// Dump ruleset info
    Info {
        /// Ruleset file to inspect
        #[arg(short, long)]
        input: PathBuf,

        /// Print every decoded rule
        #[arg(long)]
        dump: bool,
    },

    /// Keep the sources of a sources file compiled until interrupted
    Watch {
        /// JSON array of `{id, group, url | path, allow_abp_snippets}`
        #[arg(short, long)]
        sources: PathBuf,

        /// Output root; rulesets land in `<root>/<group>/<id>.dat`
        #[arg(short, long, default_value = "rulesets")]
        root: PathBuf,

        /// JSON schedule overrides (durations in seconds)
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Fetch every source right away instead of following the schedule
        #[arg(long)]
        fetch_now: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            allow_abp_snippets,
        } => cmd_compile(&input, &output, allow_abp_snippets),
        Commands::Info { input, dump } => cmd_info(&input, dump),
        Commands::Watch {
            sources,
            root,
            policy,
            fetch_now,
        } => watch::cmd_watch(&sources, &root, policy.as_deref(), fetch_now),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(input: &Path, output: &Path, allow_abp_snippets: bool) -> Result<(), String> {
    let start = Instant::now();
    let bytes = fs::read(input).map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;
    let content = String::from_utf8_lossy(&bytes);

    let kind = sniff_content(&content);
    let result = parse_content(&content, allow_abp_snippets);
    let parse_time = start.elapsed();
    if !result.fetch_result.is_success() {
        return Err(format!(
            "'{}' produced no usable rules ({:?})",
            input.display(),
            result.fetch_result
        ));
    }

    let build_start = Instant::now();
    let checksum = save_ruleset(&result, output).map_err(|e| e.to_string())?;
    let build_time = build_start.elapsed();
    let size = fs::metadata(output).map(|m| m.len()).unwrap_or_default();

    let info = result.rules_info;
    println!("Compiled '{}' ({:?}) to '{}'", input.display(), kind, output.display());
    if let Some(title) = &result.metadata.title {
        println!("  Title:      {}", title);
    }
    println!("  Expires:    {}h", result.metadata.expires.as_secs() / 3600);
    println!(
        "  Entries:    {} valid, {} invalid, {} unsupported",
        info.valid, info.invalid, info.unsupported
    );
    println!(
        "  Rules:      {} filter, {} cosmetic, {} scriptlet",
        result.filter_rules.len(),
        result.cosmetic_rules.len(),
        result.scriptlet_injection_rules.len()
    );
    if let Some(infos) = &result.tracker_infos {
        println!("  Trackers:   {}", infos.len());
    }
    println!("  Size:       {} bytes ({:.1} KB)", size, size as f64 / 1024.0);
    println!("  Checksum:   {}", checksum);
    println!(
        "  Time:       {:.1}ms (parse: {:.1}ms, build: {:.1}ms)",
        start.elapsed().as_secs_f64() * 1000.0,
        parse_time.as_secs_f64() * 1000.0,
        build_time.as_secs_f64() * 1000.0,
    );

    Ok(())
}

fn cmd_info(input: &Path, dump: bool) -> Result<(), String> {
    let file = fs::read(input).map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;
    let buffer = strip_header(&file).map_err(|e| format!("Invalid ruleset: {}", e))?;
    let view = RulesetView::load(buffer).map_err(|e| format!("Invalid ruleset: {}", e))?;

    println!("Ruleset: {}", input.display());
    println!("  Version:     {}", view.version);
    println!("  Sections:    {}", view.section_count());
    println!("  Total size:  {} bytes ({:.1} KB)", file.len(), file.len() as f64 / 1024.0);
    println!("  Checksum:    {}", ruleset_checksum(buffer));
    println!();

    println!("Pools:");
    for (label, id) in [
        ("Strings", SectionId::StrPool),
        ("Domain lists", SectionId::DomainLists),
        ("Arg lists", SectionId::ArgLists),
    ] {
        let length = view.get_section_info(id).map(|info| info.length).unwrap_or_default();
        println!("  {:<13}{} bytes", format!("{label}:"), length);
    }
    println!();

    println!("Rules:");
    println!("  Filter:      {}", view.filter_rule_count());
    println!("  Cosmetic:    {}", view.cosmetic_rule_count());
    println!("  Scriptlet:   {}", view.scriptlet_rule_count());

    if dump {
        let decoded = view.decode().map_err(|e| format!("Invalid ruleset: {}", e))?;
        println!();
        for rule in &decoded.filter_rules {
            println!(
                "  {}{:?} {:?} host={:?} types={:?} +{:?} -{:?}",
                if rule.is_allow_rule() { "@@" } else { "" },
                rule.pattern_type,
                rule.pattern,
                rule.host,
                rule.resource_types,
                rule.included_domains,
                rule.excluded_domains
            );
        }
        for rule in &decoded.cosmetic_rules {
            println!(
                "  {}{} +{:?} -{:?}",
                if rule.core.is_allow_rule { "#@#" } else { "##" },
                rule.selector,
                rule.core.included_domains,
                rule.core.excluded_domains
            );
        }
        for rule in &decoded.scriptlet_injection_rules {
            println!(
                "  {}+js({}) {:?} +{:?} -{:?}",
                if rule.core.is_allow_rule { "#@#" } else { "##" },
                rule.scriptlet_name,
                rule.arguments,
                rule.core.included_domains,
                rule.core.excluded_domains
            );
        }
    }

    Ok(())
}
