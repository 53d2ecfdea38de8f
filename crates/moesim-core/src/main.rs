//! MoE Sim CLI — Watch tokens get routed through a Mixture-of-Experts layer.

use clap::{Parser, Subcommand};
use moesim_core::config::SimConfig;
use moesim_core::expert::SPECIALIZATIONS;
use moesim_core::metrics;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(
    name = "moesim",
    about = "Simulate Mixture-of-Experts token routing on a virtual clock",
    version
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a sentence through the experts and report load balance.
    Run {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Text to tokenize and route.
        #[arg(short, long)]
        text: String,
        /// Experts selected per token.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Number of experts.
        #[arg(short, long)]
        experts: Option<usize>,
        /// Random seed.
        #[arg(short, long)]
        seed: Option<u64>,
        /// Write the final snapshot to a JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compare load balance for several top-K values on the same text.
    Compare {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Text to tokenize and route.
        #[arg(short, long)]
        text: String,
        /// Comma-separated list of top-K values.
        #[arg(short = 'k', long, value_delimiter = ',', default_value = "1,2,4")]
        top_k: Vec<usize>,
        /// Number of experts.
        #[arg(short, long)]
        experts: Option<usize>,
        /// Output results to JSON file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List expert specialization labels.
    Specializations,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            text,
            top_k,
            experts,
            seed,
            output,
        } => {
            let mut sim_config = load_config(config.as_deref(), experts);
            if let Some(k) = top_k {
                sim_config.moe.top_k = k.clamp(1, sim_config.moe.num_experts);
            }
            if seed.is_some() {
                sim_config.simulation.seed = seed;
            }
            let name = sim_config.simulation.name.clone();

            let snapshot = moesim_core::run_text(sim_config, &text).unwrap_or_else(|e| {
                eprintln!("Error running simulation: {}", e);
                std::process::exit(1);
            });
            println!(
                "{}",
                metrics::format_stats_table(&name, &snapshot.stats, &snapshot.experts)
            );

            if let Some(output_path) = output {
                write_json(&output_path, &snapshot);
            }
        }
        Commands::Compare {
            config,
            text,
            top_k,
            experts,
            output,
        } => {
            let sim_config = load_config(config.as_deref(), experts);
            let results =
                moesim_core::compare_top_k(&sim_config, &text, &top_k).unwrap_or_else(|e| {
                    eprintln!("Error running comparison: {}", e);
                    std::process::exit(1);
                });
            println!("{}", metrics::format_comparison_table(&results));

            if let Some(output_path) = output {
                write_json(&output_path, &results);
            }
        }
        Commands::Specializations => {
            println!("Expert specializations:");
            for (i, label) in SPECIALIZATIONS.iter().enumerate() {
                println!("  {:>2}. {}", i + 1, label);
            }
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }
}

fn load_config(path: Option<&Path>, experts: Option<usize>) -> SimConfig {
    let mut config = match path {
        Some(p) => SimConfig::from_file(p).unwrap_or_else(|e| {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }),
        None => SimConfig::default(),
    };
    if let Some(n) = experts {
        config.moe.num_experts = n;
        config.validate().unwrap_or_else(|e| {
            eprintln!("Invalid expert count: {}", e);
            std::process::exit(1);
        });
        config.moe.top_k = config.moe.top_k.clamp(1, n);
    }
    config
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing results: {}", e);
        std::process::exit(1);
    });
    std::fs::write(path, json).unwrap_or_else(|e| {
        eprintln!("Error writing output: {}", e);
        std::process::exit(1);
    });
    println!("Results written to {}", path.display());
}
