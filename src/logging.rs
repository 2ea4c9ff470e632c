use chrono::Local;
use log::LevelFilter;
use simplelog::{CombinedLogger, ConfigBuilder, WriteLogger};
use std::fs::{self, OpenOptions};
use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::sync::OnceLock;

static LOGGER_INITIALIZED: OnceLock<bool> = OnceLock::new();

pub fn log_dir() -> Result<PathBuf, Error> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::new(ErrorKind::NotFound, "HOME environment variable not set"))?;

    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("barsyncrs")
        .join("logs"))
}

/// One log file per day, e.g. `app-2024-05-01.log`
pub fn log_file_name() -> String {
    format!("app-{}.log", Local::now().format("%Y-%m-%d"))
}

/// Routes the `log` facade into the daily log file. Only the first call installs a logger.
pub fn init_logger(level: LevelFilter) -> Result<(), Error> {
    let log_dir = log_dir()?;
    fs::create_dir_all(&log_dir)?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(log_file_name()))?;

    let config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Debug)
        .build();

    let initialized = *LOGGER_INITIALIZED.get_or_init(|| {
        CombinedLogger::init(vec![WriteLogger::new(level, config, log_file)]).is_ok()
    });

    if initialized {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Other, "Logger initialization failed"))
    }
}

/// Logs to stderr instead, filtered by `RUST_LOG`
pub fn init_stderr_logger(default_level: LevelFilter) -> Result<(), Error> {
    let initialized = *LOGGER_INITIALIZED.get_or_init(|| {
        env_logger::Builder::new()
            .filter_level(default_level)
            .parse_default_env()
            .try_init()
            .is_ok()
    });

    if initialized {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Other, "Logger initialization failed"))
    }
}
