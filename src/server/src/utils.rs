use log4rs::{append, config, encode};
use std::error;

const LOG_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S)} {l} {t}] {m}{n}";

/// Route `log` records to stdout and, when `log_file` is set, to that file.
/// Panics are logged too.
pub fn init_logger(
    log_file: Option<&str>,
    level: log::LevelFilter,
) -> Result<(), Box<dyn error::Error>> {
    log_panics::init();

    let stdout = append::console::ConsoleAppender::builder()
        .encoder(Box::new(encode::pattern::PatternEncoder::new(LOG_PATTERN)))
        .build();

    let mut builder = config::Config::builder()
        .appender(config::Appender::builder().build("stdout", Box::new(stdout)));
    let mut root = config::Root::builder().appender("stdout");

    if let Some(path) = log_file {
        let logfile = append::file::FileAppender::builder()
            .encoder(Box::new(encode::pattern::PatternEncoder::new(LOG_PATTERN)))
            .build(path)?;
        builder =
            builder.appender(config::Appender::builder().build("logfile", Box::new(logfile)));
        root = root.appender("logfile");
    }

    let config = builder.build(root.build(level))?;
    log4rs::init_config(config)?;

    Ok(())
}
