//! Various utility and helper functions shared across the crate.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Once,
    time::{SystemTime, UNIX_EPOCH},
};

use log::LevelFilter;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {M}: {m}{n}";

/// Get the system specific home directory.
/// Uses "/tmp" directory for integration tests.
fn get_home_dir() -> PathBuf {
    if cfg!(test) {
        "/tmp".into()
    } else {
        dirs::home_dir().expect("home directory expected")
    }
}

/// Get the default data directory. `~/.fiatswap`.
pub fn get_data_dir() -> PathBuf {
    get_home_dir().join(".fiatswap")
}

/// Sets up the logger for the trade engine.
///
/// Always logs to stdout. When a data directory is given, a `debug.log` file is
/// written there as well. Subsequent calls are no-ops.
pub fn setup_logger(filter: LevelFilter, data_dir: Option<PathBuf>) {
    static LOGGER: Once = Once::new();
    LOGGER.call_once(|| {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build();

        let mut config = Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
        let mut root = Root::builder().appender("stdout");

        if let Some(dir) = data_dir {
            match FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
                .build(dir.join("debug.log"))
            {
                Ok(file) => {
                    config = config.appender(Appender::builder().build("file", Box::new(file)));
                    root = root.appender("file");
                }
                Err(e) => eprintln!("Failed to create log file in {}: {}", dir.display(), e),
            }
        }

        match config.build(root.build(filter)) {
            Ok(config) => {
                if let Err(e) = log4rs::init_config(config) {
                    eprintln!("Failed to initialize logger: {}", e);
                }
            }
            Err(e) => eprintln!("Invalid logger configuration: {}", e),
        }
    });
}

/// Reads a TOML file into a flat key/value map.
///
/// Keys nested one table deep (`[section] key = ..`) are lifted to the top level, so
/// a config file may group its fields under a section header.
pub fn parse_toml(file_path: &Path) -> io::Result<HashMap<String, toml::Value>> {
    let contents = fs::read_to_string(file_path)?;
    let table = contents
        .parse::<toml::Table>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let mut map = HashMap::new();
    for (key, value) in table {
        match value {
            toml::Value::Table(section) => {
                for (inner_key, inner_value) in section {
                    map.insert(inner_key, inner_value);
                }
            }
            other => {
                map.insert(key, other);
            }
        }
    }
    Ok(map)
}

/// Parses a config value into `T`, falling back to `default` if the value is
/// missing or can't be parsed.
pub fn parse_field<T: FromStr>(value: Option<&toml::Value>, default: T) -> T {
    let raw = match value {
        Some(toml::Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => return default,
    };
    match raw.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            log::warn!("Invalid config value {:?}, using default", raw);
            default
        }
    }
}

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// First 8 characters of an id, for compact log lines.
pub fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(id.len());
    &id[..end]
}
