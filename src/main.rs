use clap::Parser;
use eframe::egui;
use log::{error, info};
use log_explorer::buffer::RotationPolicy;
use log_explorer::config::Config;
use std::path::PathBuf;

mod app;

use app::LogExplorerApp;

/// Follow a directory of log files and search them as they grow.
#[derive(Debug, Parser)]
#[command(name = "log-explorer", version, about)]
struct Args {
    /// Directory holding the log files
    #[arg(short = 'd', long)]
    log_dir: Option<PathBuf>,

    /// File name glob, e.g. "output_log_*.txt"
    #[arg(short, long)]
    pattern: Option<String>,

    /// Query to search for at startup
    #[arg(short, long)]
    search: Option<String>,

    /// Maximum number of retained lines
    #[arg(long)]
    max_lines: Option<usize>,

    /// What to do with retained lines when a new log file takes over
    #[arg(long, value_enum)]
    rotation: Option<RotationPolicy>,

    /// Write an example config file and exit
    #[arg(long)]
    create_config: bool,
}

fn main() -> eframe::Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    if args.create_config {
        match Config::create_example() {
            Ok(path) => println!("Wrote example config to {}", path.display()),
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut config = Config::load();
    if let Some(dir) = args.log_dir {
        config.log_directory = Some(dir);
    }
    if let Some(pattern) = args.pattern {
        config.file_pattern = pattern;
    }
    if let Some(max_lines) = args.max_lines {
        config.max_retained_lines = max_lines;
    }
    if let Some(rotation) = args.rotation {
        config.rotation = rotation;
    }

    info!(
        "Log Explorer starting: {:?} '{}', keeping {} lines",
        config.resolved_log_directory(),
        config.file_pattern,
        config.max_retained_lines
    );

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title("Log Explorer"),
        ..Default::default()
    };

    eframe::run_native(
        "Log Explorer",
        native_options,
        Box::new(move |cc| Ok(Box::new(LogExplorerApp::new(cc, config, args.search)))),
    )
}
