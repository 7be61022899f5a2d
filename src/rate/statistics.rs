use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Key format of the statistics side file.
pub const KEY_FORMAT: &str = "%H:%M:%S";

/// On-disk form of the rate tables (`request_statistics_<date>.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatistics {
    pub requests_per_second: BTreeMap<String, u64>,
    pub requests_per_minute: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests_per_hour: BTreeMap<String, u64>,
}

impl RequestStatistics {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("opening statistics {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("decoding statistics {}", path.display()))
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self).context("encoding statistics")
    }
}

pub(crate) fn encode_table(table: &BTreeMap<NaiveTime, u64>) -> BTreeMap<String, u64> {
    table
        .iter()
        .map(|(t, n)| (t.format(KEY_FORMAT).to_string(), *n))
        .collect()
}

pub(crate) fn decode_table(
    name: &str,
    table: &BTreeMap<String, u64>,
) -> Result<BTreeMap<NaiveTime, u64>> {
    table
        .iter()
        .map(|(key, n)| {
            NaiveTime::parse_from_str(key, KEY_FORMAT)
                .map(|t| (t, *n))
                .with_context(|| format!("invalid {name} key {key:?}"))
        })
        .collect()
}
