use serde::Deserialize;

use crate::error::Result;
use crate::storage::disk::DiskType;

#[derive(Debug, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
}

#[derive(Debug, PartialEq, Deserialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub disk_type: DiskType,
    pub pool_size: usize,
}

impl Config {
    pub fn new(file: &str) -> Result<Config> {
        let mut cfg = config::Config::builder()
            .set_default("disk_type", "memory")?
            .set_default("log_level", "debug")?
            .set_default("pool_size", 64)?;
        if !file.is_empty() {
            cfg = cfg.add_source(config::File::with_name(file))
        }
        cfg = cfg.add_source(config::Environment::with_prefix("PAGECACHE"));
        Ok(cfg.build()?.try_deserialize()?)
    }
}
