use std::process;

use directories::ProjectDirs;
use log::error;

use datakit::cli::Cli;
use datakit::config::{Config, CONFIG};
use datakit::logging;

fn main() {
    let Some(project_dirs) = ProjectDirs::from("", "", "datakit") else {
        eprintln!("Could not determine project directories");
        process::exit(1);
    };

    let config = Config::load_config(&project_dirs);
    let log_dir = project_dirs.data_local_dir().join("logs");

    let _logger = match logging::init_file_logging(&config.logging, &log_dir) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("{}", e);
            logging::init_stderr_logging(&config.logging).ok()
        }
    };

    let _ = CONFIG.set(config);

    if let Err(err) = Cli::handle_command_line(&project_dirs) {
        error!("{}", err);
        eprintln!("{}", err);
        process::exit(1);
    }
}
