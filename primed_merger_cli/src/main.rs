use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libprimed_merger::config::Config;
use libprimed_merger::process::{create_subsets, process_subset, ChannelSummary};
use libprimed_merger::worker_status::WorkerStatus;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("primed_merger_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
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

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );

        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(config) => config,
        Err(error) => {
            log::error!("{error}");
            return;
        }
    };
    if let Err(error) = config.validate() {
        log::error!("{error}");
        return;
    }
    if !config.is_n_threads_valid() {
        log::error!("Number of workers must be at least 1!");
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Cycler Path: {}", config.cycler_path.to_string_lossy());
    log::info!(
        "EIS Path: {}",
        config
            .eis_path
            .as_ref()
            .map(|path| path.to_string_lossy().to_string())
            .unwrap_or(String::from("None"))
    );
    log::info!("Channels: {:?}", config.channel_numbers);
    log::info!("Cells: {:?}", config.cell_numbers);
    log::info!("Number of workers: {}", config.n_threads);

    // One worker per subset of channels; each worker reports over the channel
    let subsets = create_subsets(&config);
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut handles = Vec::new();
    let mut bars: Vec<ProgressBar> = Vec::new();
    for (worker_id, subset) in subsets.into_iter().enumerate() {
        let bar = pb_manager.add(ProgressBar::new(100));
        if subset.is_empty() {
            bar.finish();
            bars.push(bar);
            continue;
        }
        bars.push(bar);
        let worker_config = config.clone();
        let worker_tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            process_subset(worker_config, worker_tx, worker_id, subset)
        }));
    }
    drop(tx);

    // Drain status updates until every worker hangs up
    for status in rx {
        if let Some(bar) = bars.get(status.worker_id) {
            bar.set_position((status.progress * 100.0) as u64);
        }
    }
    for bar in &bars {
        bar.finish();
    }

    let mut summaries: Vec<ChannelSummary> = Vec::new();
    for handle in handles {
        match handle.join() {
            Ok(Ok(worker_summaries)) => summaries.extend(worker_summaries),
            Ok(Err(error)) => log::error!("Assembly failed with error: {error}"),
            Err(_) => log::error!("Failed to join worker thread!"),
        }
    }

    summaries.sort_by_key(|summary| summary.channel_number);
    for summary in &summaries {
        log::info!(
            "Channel {} (cell {}): {} files, {} cycles, {} steps, {} rows, {} sweeps matched, {} unmatched",
            summary.channel_number,
            summary.cell_number,
            summary.n_files,
            summary.n_cycles,
            summary.n_steps,
            summary.n_rows,
            summary.sweeps_matched,
            summary.sweeps_unmatched
        );
    }

    log::info!("Done.");
}
