use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::resource::round_half_up;

/// One switch counter sample.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SwitchFlowSample {
    /// Epoch seconds.
    pub timestamp: f64,
    pub bytes_per_second: f64,
    pub packets_per_second: f64,
}

/// Flow counters of one switch as stored in `switch_flow_stats_<date>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchFlowStats {
    pub switch_id: String,
    #[serde(default)]
    pub samples: Vec<SwitchFlowSample>,
}

/// Reads the switch-flow side file.
pub fn load_flow_file(path: &Path) -> Result<Vec<SwitchFlowStats>> {
    let file = File::open(path).with_context(|| format!("opening flow stats {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("decoding flow stats {}", path.display()))
}

/// Per-second index over one switch's samples.
#[derive(Debug, Clone)]
pub struct SwitchFlowSeries {
    switch_id: String,
    by_second: HashMap<i64, SwitchFlowSample>,
}

impl SwitchFlowSeries {
    pub fn new(stats: SwitchFlowStats) -> Self {
        let by_second = stats
            .samples
            .into_iter()
            .map(|s| (round_half_up(s.timestamp), s))
            .collect();
        Self {
            switch_id: stats.switch_id,
            by_second,
        }
    }

    /// Index over the first switch of the day's list.
    pub fn first_of(stats: Vec<SwitchFlowStats>) -> Option<Self> {
        stats.into_iter().next().map(Self::new)
    }

    pub fn switch_id(&self) -> &str {
        &self.switch_id
    }

    pub fn bytes_per_second(&self, epoch_secs: f64) -> Option<f64> {
        self.sample_near(epoch_secs).map(|s| s.bytes_per_second)
    }

    pub fn packets_per_second(&self, epoch_secs: f64) -> Option<f64> {
        self.sample_near(epoch_secs).map(|s| s.packets_per_second)
    }

    pub fn at_second(&self, second: i64) -> Option<&SwitchFlowSample> {
        self.by_second.get(&second)
    }

    fn sample_near(&self, epoch_secs: f64) -> Option<&SwitchFlowSample> {
        self.at_second(round_half_up(epoch_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOW_JSON: &str = r#"[
        {"switch_id": "sw-core-1", "samples": [
            {"timestamp": 1000, "bytes_per_second": 2048.0, "packets_per_second": 12.0},
            {"timestamp": 1001.2, "bytes_per_second": 4096.0, "packets_per_second": 24.0}
        ]},
        {"switch_id": "sw-edge-2", "samples": []}
    ]"#;

    #[test]
    fn test_first_switch_selected() {
        let stats: Vec<SwitchFlowStats> = serde_json::from_str(FLOW_JSON).expect("decode");
        let series = SwitchFlowSeries::first_of(stats).expect("one switch");
        assert_eq!(series.switch_id(), "sw-core-1");
        assert_eq!(series.bytes_per_second(1000.3), Some(2048.0));
        assert_eq!(series.packets_per_second(1000.5), Some(24.0));
        assert_eq!(series.bytes_per_second(1003.0), None);
    }

    #[test]
    fn test_empty_list() {
        assert!(SwitchFlowSeries::first_of(Vec::new()).is_none());
    }

    #[test]
    fn test_load_flow_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("switch_flow_stats_2021-12-20.json");
        std::fs::write(&path, FLOW_JSON).expect("write");
        let stats = load_flow_file(&path).expect("load");
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].switch_id, "sw-edge-2");

        assert!(load_flow_file(&dir.path().join("missing.json")).is_err());
    }
}
