use std::fmt::Write as _;
use std::str::FromStr as _;

const DEFAULT_LOG_LEVEL: log::LevelFilter = log::LevelFilter::Info;

const DEFAULT_FILTERS: &[(&str, log::LevelFilter)] = &[
    ("tokio", log::LevelFilter::Warn),
    ("config", log::LevelFilter::Warn),
];

/// Install the global `env_logger`.
///
/// `RUST_LOG` takes priority over the configured `log_level`.
pub fn setup(log_level: Option<&str>) -> Result<(), log::SetLoggerError> {
    let user_filters = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| log_level.map(str::to_string))
        .unwrap_or_default();

    env_logger::Builder::new()
        .parse_filters(&filter(&user_filters))
        .format_timestamp_millis()
        .try_init()
}

fn filter(user_filters: &str) -> String {
    let mut filter = String::new();

    let user_log_level = user_filters
        .rsplit(',')
        .find_map(|dir| log::LevelFilter::from_str(dir).ok());

    if user_log_level.is_none() {
        write!(&mut filter, "{DEFAULT_LOG_LEVEL}").unwrap(); // Writing into `String` never fails
    }

    for &(target, log_level) in DEFAULT_FILTERS {
        if user_log_level.unwrap_or(DEFAULT_LOG_LEVEL) > log_level {
            let comma = if filter.is_empty() { "" } else { "," };
            write!(&mut filter, "{comma}{target}={log_level}").unwrap(); // Writing into `String` never fails
        }
    }

    if !user_filters.is_empty() {
        let comma = if filter.is_empty() { "" } else { "," };
        write!(&mut filter, "{comma}{user_filters}").unwrap(); // Writing into `String` never fails
    }

    filter
}
