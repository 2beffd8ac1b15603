use clap::{Arg, ArgAction, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libgas_formatter::batch_status::BatchStatus;
use libgas_formatter::config::Config;
use libgas_formatter::process::process_batch;

const LOG_FILE_NAME: &str = "gas_formatter.log";

fn make_template_config(path: &Path) -> std::io::Result<()> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).map_err(std::io::Error::other)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())
}

fn log_config(config: &Config) {
    let show = |path: &Option<PathBuf>| {
        path.as_ref()
            .map_or(String::from("None"), |p| p.to_string_lossy().to_string())
    };
    log::info!("Input Path: {}", config.input_path.to_string_lossy());
    log::info!("Relay Data Path: {}", show(&config.relay_data_path));
    log::info!("JSON Path: {}", show(&config.json_path));
    log::info!("Table Path: {}", show(&config.table_path));
    log::info!("Repeat Data Path: {}", show(&config.repeat_data_path));
    log::info!("Analytes: {}", config.analytes.join(", "));
    log::info!("Materials: {}", config.materials.join(", "));
    log::info!(
        "Mode: {:?} Rig: {:?} Concentration: {:?}",
        config.mode,
        config.rig,
        config.concentration_source
    );
    log::info!(
        "Minimum Exposure: {} s Require Baseline: {}",
        config.min_exposure_seconds,
        config.require_baseline
    );
}

fn main() {
    // Create a cli
    let matches = Command::new("gas_formatter_cli")
        .about("Format gas sensor acquisition logs into exposure records")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("run")
                .about("Process the logs named by the configuration")
                .arg(
                    Arg::new("clear")
                        .long("clear")
                        .action(ArgAction::SetTrue)
                        .help("Remove existing files from the output directories first"),
                )
                .arg(
                    Arg::new("label")
                        .short('l')
                        .long("label")
                        .help("Sensor label used when a file name carries none"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )];
    match File::create(LOG_FILE_NAME) {
        Ok(file) => loggers.push(simplelog::WriteLogger::new(
            simplelog::LevelFilter::Info,
            simplelog::Config::default(),
            file,
        )),
        Err(e) => eprintln!("Could not create log file {LOG_FILE_NAME}: {e}"),
    }
    let logger = simplelog::CombinedLogger::new(loggers);

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");
    log::set_max_level(log::LevelFilter::Info);

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    let (clear, label) = match matches.subcommand() {
        Some(("new", _)) => {
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );
            match make_template_config(&config_path) {
                Ok(()) => log::info!("Done."),
                Err(e) => log::error!("Could not write template config: {e}"),
            }
            return;
        }
        Some(("run", run)) => (
            run.get_flag("clear"),
            run.get_one::<String>("label").cloned(),
        ),
        _ => (false, None),
    };

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log_config(&config);

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(0));
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
        pb.set_style(style);
    }
    let (tx, rx) = mpsc::channel::<BatchStatus>();
    // Spawn the task!
    let handle = std::thread::spawn(move || process_batch(&config, label, clear, &tx));

    // The channel closes when the batch finishes
    for status in rx {
        pb.set_length(status.n_files as u64);
        pb.set_position((status.file_index + 1) as u64);
        pb.set_message(status.file_name);
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(summary) if summary.skipped.is_empty() => {
                log::info!("Successfully formatted all logs!")
            }
            Ok(summary) => log::warn!(
                "{} logs were skipped, check {} for details",
                summary.skipped.len(),
                LOG_FILE_NAME
            ),
            Err(e) => log::error!("Formatting failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join formatting task!"),
    }

    pb.finish();

    log::info!("Done.");
}
