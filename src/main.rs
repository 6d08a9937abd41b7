//! Tabu Repair CLI - Search for test-passing patches from a JSON configuration.

use std::fs;
use std::path::PathBuf;

use tabu_repair::{
    RepairConfig,
    repair::run_repair,
    schema::{ProgramConfig, SearchPhase},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [report.json]", args[0]);
        eprintln!();
        eprintln!("Search for a patch that makes the configured test command pass.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to repair configuration file");
        eprintln!("  report.json  Optional path to write the JSON report");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let report_path = args.get(2).map(PathBuf::from);

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: RepairConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    // Pull in the project's target file, if one is named
    let config = config.resolved().unwrap_or_else(|e| {
        eprintln!("Error loading target config: {}", e);
        std::process::exit(1);
    });

    println!("Tabu Repair");
    println!("===========");
    println!("Project: {}", config.program.project_path.display());
    for target in &config.program.target_files {
        println!("Target: {}", target.display());
    }
    println!("Test command: {}", config.program.test_command);
    println!("Granularity: {:?}", config.program.granularity);
    println!(
        "Epochs: {}, iterations: {}, timeout: {}s",
        config.search.epoch, config.search.max_iter, config.search.timeout_secs
    );
    println!();

    let report = run_repair(&config, |progress| {
        if progress.phase == SearchPhase::EpochComplete {
            println!(
                "  Epoch {}/{}: {} evaluations, best fitness {:?}",
                progress.epoch, progress.total_epochs, progress.iteration, progress.best_fitness
            );
        }
    })
    .unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    println!();
    print!("{}", report);

    if let Some(path) = report_path {
        if let Err(e) = report.save_json(&path) {
            eprintln!("Error writing report: {}", e);
            std::process::exit(1);
        }
        println!("Report written to {}", path.display());
    }
}

fn print_example_config() {
    let config = RepairConfig {
        program: ProgramConfig::default(),
        search: Default::default(),
    };

    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
}
