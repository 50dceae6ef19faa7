//! Slippyset CLI - Command-line interface
//!
//! This binary provides a command-line interface to the slippyset library.

use clap::{Parser, Subcommand};
use slippyset::cache::TileCache;
use slippyset::config::PipelineConfig;
use slippyset::dataset::DatasetManifest;
use slippyset::index;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "slippyset")]
#[command(version = slippyset::VERSION)]
#[command(about = "Compose training datasets from slippy-map tile pyramids", long_about = None)]
struct Args {
    /// Directory for session log files (logging disabled when omitted)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a pipeline config and report dataset coverage
    Check {
        /// Path to the pipeline TOML config
        #[arg(long)]
        config: PathBuf,

        /// Also compose the first N tiles to verify decode and band selection
        #[arg(long, default_value = "0")]
        compose: usize,
    },
    /// Enumerate one tile pyramid directory and report its coverage
    Cover {
        /// Pyramid root directory (zoom/x/y.ext layout)
        path: PathBuf,
    },
}

fn main() {
    let args = Args::parse();

    // Guard must outlive the command so the file writer flushes on exit
    let _logging_guard = args.log_dir.as_ref().map(|dir| {
        let dir = dir.to_string_lossy();
        match slippyset::logging::init_logging(&dir, slippyset::logging::default_log_file()) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Error initializing logging: {}", e);
                process::exit(1);
            }
        }
    });
    tracing::debug!(version = slippyset::VERSION, "slippyset starting");

    match args.command {
        Command::Check { config, compose } => check(&config, compose),
        Command::Cover { path } => cover(&path),
    }
}

fn check(config_path: &PathBuf, compose: usize) {
    let config = match PipelineConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    let palette = match config.palette() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error in [classes]: {}", e);
            process::exit(1);
        }
    };

    let channels = match config.channel_sources() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error in [[channels]]: {}", e);
            process::exit(1);
        }
    };

    println!("Dataset: {}", config.dataset.path.display());
    println!("Classes: {}", palette.titles().join(", "));

    let manifest = match DatasetManifest::build(
        &config.dataset.path,
        channels,
        config.dataset.labels.clone(),
    ) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error indexing dataset: {}", e);
            process::exit(1);
        }
    };

    println!();
    for (sub, count) in &manifest.stats().discovered {
        println!("  {:<16} {} tiles", sub, count);
    }
    println!("  {:<16} {} tiles", "intersection", manifest.len());

    if manifest.is_empty() {
        eprintln!();
        eprintln!("Error: no tile address is present in every source");
        process::exit(1);
    }

    if compose > 0 {
        let has_labels = config.dataset.labels.is_some();
        let compositor = manifest.compositor(
            has_labels.then(|| palette.clone()),
            Arc::new(TileCache::default()),
        );

        println!();
        for address in manifest.addresses().iter().take(compose) {
            let tensor = match compositor.compose(*address) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("Error composing {}: {}", address, e);
                    process::exit(1);
                }
            };
            let (bands, height, width) = tensor.shape();
            print!("  {} -> {}x{}x{}", address, bands, height, width);

            if compositor.has_labels() {
                match compositor.compose_label(*address) {
                    Ok(_) => print!(" + mask"),
                    Err(e) => {
                        println!();
                        eprintln!("Error decoding label for {}: {}", address, e);
                        process::exit(1);
                    }
                }
            }
            println!();
        }
    }

    println!();
    println!("✓ Config and dataset check out");
}

fn cover(path: &PathBuf) {
    let addresses = match index::enumerate(path) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error enumerating pyramid: {}", e);
            process::exit(1);
        }
    };

    println!("{}: {} tiles", path.display(), addresses.len());

    if let (Some(first), Some(last)) = (addresses.iter().next(), addresses.iter().next_back()) {
        if first.zoom == last.zoom {
            println!("  zoom {}", first.zoom);
        } else {
            println!("  zooms {} to {}", first.zoom, last.zoom);
        }
    }
}
