use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use libnexus_converter::config::Config;
use libnexus_converter::convert::convert;

fn main() -> ExitCode {
    // Create a cli
    let matches = Command::new("nexus_converter_cli")
        .about("Convert experimental data into NeXus/HDF5 files")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return ExitCode::FAILURE;
    }

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(path) => PathBuf::from(path),
        None => {
            log::error!("A configuration path is required (-p/--path)");
            return ExitCode::FAILURE;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        return match Config::default().write_config_file(&config_path) {
            Ok(()) => {
                log::info!("Done.");
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Application definition: {}", config.nxdl);
    log::info!("Reader: {}", config.reader);
    log::info!("Input files: {}", config.input_files.len());
    if let Some(eln_path) = &config.eln_path {
        log::info!("ELN file: {}", eln_path.to_string_lossy());
    }
    log::info!("Output: {}", config.output.to_string_lossy());

    // Conversions are synchronous; the spinner only shows we are alive
    let pb = pb_manager.add(ProgressBar::new_spinner());
    pb.set_message(format!("Converting to {}", config.nxdl));
    pb.enable_steady_tick(Duration::from_millis(100));

    let status = match convert(&config) {
        Ok(output) => {
            log::info!("Successfully wrote {}", output.to_string_lossy());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Conversion failed with error: {e}");
            ExitCode::FAILURE
        }
    };

    pb.finish_and_clear();

    log::info!("Done.");
    status
}
