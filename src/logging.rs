use std::path::Path;

use chrono::Local;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}";

/// Console plus a timestamped file under `log_dir`.
pub fn setup_logging(log_dir: &Path, level: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let timestamp = Local::now().format("%Y-%m-%d-%H_%M").to_string();
    let log_path = log_dir.join(format!("{timestamp}.log"));
    let level: LevelFilter = level
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown log level {level:?}"))?;

    let file_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(log_path)?;
    let console_appender = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .appender(Appender::builder().build("console", Box::new(console_appender)))
        .build(Root::builder().appender("file").appender("console").build(level))?;

    log4rs::init_config(config)?;

    Ok(())
}
