use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use toml::Value;

use crate::{
    error::{Error, Result},
    stockplotter::ChartNaming,
    storage::Selection,
};

pub const CONFIG_FILE: &str = "config.toml";

/// What the fetcher asks the market data provider for.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    pub tickers: Vec<String>,
    pub period: String,
    pub interval: String,
    pub auto_adjust: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            tickers: ["META", "AAPL", "AMZN", "NFLX", "GOOG"]
                .iter()
                .map(|t| String::from(*t))
                .collect(),
            period: String::from("5d"),
            interval: String::from("1h"),
            auto_adjust: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub fetch: FetchConfig,
    pub data_dir: PathBuf,
    pub plot_dir: PathBuf,
    pub img_width: u32,
    pub img_height: u32,
    pub selection: Selection,
    pub naming: ChartNaming,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fetch: FetchConfig::default(),
            data_dir: PathBuf::from("data"),
            plot_dir: PathBuf::from("plots"),
            img_width: 1200,
            img_height: 600,
            selection: Selection::Name,
            naming: ChartNaming::Dataset,
        }
    }
}

impl Config {
    /// Reads `config.toml` from the working directory. A missing file means defaults.
    pub fn read_config() -> Result<Self> {
        Config::read_from(Path::new(CONFIG_FILE))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Config::from_toml_str(&contents),
            Err(error) => match error.kind() {
                ErrorKind::NotFound => Ok(Config::default()),
                _ => Err(Error::io(path, error)),
            },
        }
    }

    /// Every key is optional and falls back to its default.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config_toml = match contents.parse::<Value>() {
            Ok(toml) => toml,
            Err(error) => {
                return Err(Error::Config(format!(
                    "please check your config.toml syntax: {}",
                    error
                )))
            }
        };
        let mut config = Config::default();

        if let Some(fetch) = section(&config_toml, "fetch")? {
            if let Some(tickers) = string_list(fetch, "fetch.tickers")? {
                config.fetch.tickers = tickers;
            }
            if let Some(period) = string(fetch, "fetch.period")? {
                config.fetch.period = period;
            }
            if let Some(interval) = string(fetch, "fetch.interval")? {
                config.fetch.interval = interval;
            }
            if let Some(auto_adjust) = boolean(fetch, "fetch.auto_adjust")? {
                config.fetch.auto_adjust = auto_adjust;
            }
        }

        if let Some(storage) = section(&config_toml, "storage")? {
            if let Some(dir) = string(storage, "storage.data_dir")? {
                config.data_dir = PathBuf::from(dir);
            }
            if let Some(dir) = string(storage, "storage.plot_dir")? {
                config.plot_dir = PathBuf::from(dir);
            }
        }

        if let Some(chart) = section(&config_toml, "chart")? {
            if let Some(width) = dimension(chart, "chart.width")? {
                config.img_width = width;
            }
            if let Some(height) = dimension(chart, "chart.height")? {
                config.img_height = height;
            }
            if let Some(selection) = string(chart, "chart.selection")? {
                config.selection = selection.parse().map_err(Error::Config)?;
            }
            if let Some(naming) = string(chart, "chart.naming")? {
                config.naming = naming.parse().map_err(Error::Config)?;
            }
        }

        if config.fetch.tickers.is_empty() {
            return Err(Error::Config(String::from("fetch.tickers must name at least one ticker")));
        }
        Ok(config)
    }
}

fn leaf(key: &str) -> &str {
    key.rsplit('.').next().unwrap_or(key)
}

fn wrong_type(key: &str, expected: &str) -> Error {
    Error::Config(format!("{} must be {}", key, expected))
}

fn section<'a>(root: &'a Value, name: &str) -> Result<Option<&'a Value>> {
    match root.get(name) {
        Some(value) if value.is_table() => Ok(Some(value)),
        Some(_) => Err(wrong_type(name, "a table")),
        None => Ok(None),
    }
}

fn string(section: &Value, key: &str) -> Result<Option<String>> {
    match section.get(leaf(key)) {
        Some(value) => value
            .as_str()
            .map(|s| Some(String::from(s)))
            .ok_or_else(|| wrong_type(key, "a string")),
        None => Ok(None),
    }
}

fn boolean(section: &Value, key: &str) -> Result<Option<bool>> {
    match section.get(leaf(key)) {
        Some(value) => value.as_bool().map(Some).ok_or_else(|| wrong_type(key, "a boolean")),
        None => Ok(None),
    }
}

fn dimension(section: &Value, key: &str) -> Result<Option<u32>> {
    match section.get(leaf(key)) {
        Some(value) => match value.as_integer() {
            Some(n) if n > 0 && n <= i64::from(u32::MAX) => Ok(Some(n as u32)),
            _ => Err(wrong_type(key, "a positive integer")),
        },
        None => Ok(None),
    }
}

fn string_list(section: &Value, key: &str) -> Result<Option<Vec<String>>> {
    let array = match section.get(leaf(key)) {
        Some(value) => value.as_array().ok_or_else(|| wrong_type(key, "an array of strings"))?,
        None => return Ok(None),
    };
    array
        .iter()
        .map(|item| {
            item.as_str()
                .map(String::from)
                .ok_or_else(|| wrong_type(key, "an array of strings"))
        })
        .collect::<Result<Vec<String>>>()
        .map(Some)
}
