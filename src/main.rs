//! rust_fdrsim command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use rust_fdrsim::cli::{Cli, Commands};
use rust_fdrsim::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "summarize", "help"];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("rust_fdrsim {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            config,
            preset,
            reps,
            seed,
            fit_type,
            no_independent_filtering,
            threads,
            output,
            summary,
        }) => run_study_command(
            config.as_deref(),
            preset.as_deref(),
            reps,
            seed,
            fit_type.as_deref(),
            no_independent_filtering,
            threads,
            &output,
            summary.as_deref(),
        ),
        Some(Commands::Summarize { input, json }) => run_summarize(&input, json.as_deref()),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("rust_fdrsim v{}", VERSION);
    println!("Run `rust_fdrsim -h` for usage or `rust_fdrsim --help` for detailed information.");
}

fn print_short_help() {
    println!("rust_fdrsim v{}", VERSION);
    println!();
    println!("Usage: rust_fdrsim <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run a simulation study");
    println!("  summarize  Summarize an existing result table");
    println!();
    println!("Run `rust_fdrsim <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("rust_fdrsim v{}", VERSION);
    println!("Monte Carlo study of false discovery control for interaction tests");
    println!();
    println!("Usage: rust_fdrsim <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run a simulation study");
    println!("               - Balanced two-level factorial designs with interactions");
    println!("               - Gamma-prior means, NB or Poisson counts, zero-inflation sweep");
    println!("               - NB GLM Wald tests with BH and independent filtering");
    println!("               - One FDP record per (repetition, delta, q)");
    println!("  summarize  Per-(delta, q) FDP summaries of an existing result table");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  rust_fdrsim run --reps 200 -o results.csv --summary summary.json");
    println!();
    println!("  rust_fdrsim run --preset zip --fit-type mean -t 8");
    println!();
    println!("  rust_fdrsim summarize -i results.csv");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn run_study_command(
    config_path: Option<&str>,
    preset: Option<&str>,
    reps: Option<usize>,
    seed: Option<u64>,
    fit_type: Option<&str>,
    no_independent_filtering: bool,
    threads: Option<usize>,
    output_path: &str,
    summary_path: Option<&str>,
) -> Result<()> {
    let mut config = match (config_path, preset) {
        (Some(path), _) => {
            info!("Loading configuration from {}", path);
            StudyConfig::from_json_file(path)?
        }
        (None, Some("signed-nb")) => StudyConfig::signed_nb(),
        (None, Some("zip")) => StudyConfig::zero_inflated_poisson(),
        (None, Some(other)) => {
            return Err(SimError::InvalidConfig {
                reason: format!("unknown preset '{}', expected signed-nb or zip", other),
            })
        }
        (None, None) => StudyConfig::default(),
    };

    if let Some(r) = reps {
        config.reps = r;
    }
    if let Some(s) = seed {
        config.seed = s;
    }
    if let Some(f) = fit_type {
        config.fit_type = DispersionFit::parse(f);
    }
    if no_independent_filtering {
        config.independent_filtering = false;
    }
    if let Some(t) = threads {
        config.threads = t;
    }

    if config.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build_global()
            .ok();
    }

    info!(
        "Study: {} samples, {} features ({} signal), {} reps, deltas {:?}, q {:?}, fit {}",
        config.n_samples,
        config.n_features,
        config.n_signal,
        config.reps,
        config.deltas,
        config.q_grid,
        config.fit_type
    );

    let study = Study::with_default_estimator(config)?;
    let outcome = study.run()?;

    write_records(output_path, &outcome.records)?;
    info!("Wrote {} records to {}", outcome.records.len(), output_path);
    if !outcome.skipped.is_empty() {
        info!(
            "{} cells skipped; see warnings above for reasons",
            outcome.skipped.len()
        );
    }

    let summaries = summarize(&outcome.records);
    print!("{}", render_table(&summaries));

    if let Some(path) = summary_path {
        write_summary_json(path, &summaries, Some(study.config()))?;
        info!("Summary written to {}", path);
    }
    Ok(())
}

fn run_summarize(input_path: &str, json_path: Option<&str>) -> Result<()> {
    let records = read_records(input_path)?;
    info!("Read {} records from {}", records.len(), input_path);
    if records.is_empty() {
        return Err(SimError::EmptyData {
            reason: format!("{} contains no records", input_path),
        });
    }

    let summaries = summarize(&records);
    print!("{}", render_table(&summaries));

    if let Some(path) = json_path {
        write_summary_json(path, &summaries, None)?;
        info!("Summary written to {}", path);
    }
    Ok(())
}
