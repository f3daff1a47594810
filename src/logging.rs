// File: ./src/logging.rs
use crate::context::AppContext;
use anyhow::Result;
use log::LevelFilter;

/// Terminal plus `waqt.log` in the data dir. The file always gets debug output.
#[cfg(not(target_os = "android"))]
pub fn init(ctx: &dyn AppContext, verbose: bool) -> Result<()> {
    use simplelog::{
        ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
    };
    use std::fs::{self, OpenOptions};

    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    if let Some(path) = ctx.get_log_path() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file)),
            Err(e) => eprintln!("Warning: cannot open log file {:?}: {}", path, e),
        }
    }

    CombinedLogger::init(loggers).map_err(|e| anyhow::anyhow!("Logger already set: {}", e))
}

#[cfg(target_os = "android")]
pub fn init(_ctx: &dyn AppContext, verbose: bool) -> Result<()> {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            })
            .with_tag("WaqtRust"),
    );
    Ok(())
}
