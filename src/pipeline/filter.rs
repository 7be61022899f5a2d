use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::cmdlog::extract_command;

use super::output::PartialFile;

/// Copies every raw line of one command label into a run-wide file.
pub struct RequestFilter {
    command: String,
    out: PartialFile,
    matched: u64,
}

impl RequestFilter {
    pub fn create(command: impl Into<String>, target: &Path) -> Result<Self> {
        Ok(Self {
            command: command.into(),
            out: PartialFile::create(target)?,
            matched: 0,
        })
    }

    pub fn matches(&self, line: &str) -> bool {
        line.contains(self.command.as_str()) && extract_command(line) == self.command
    }

    /// Copies `line` if it carries the filtered label. Returns true when copied.
    pub fn process_line(&mut self, line: &str) -> Result<bool> {
        if !self.matches(line) {
            return Ok(false);
        }
        writeln!(self.out, "{line}")
            .with_context(|| format!("writing {}", self.out.target().display()))?;
        self.matched += 1;
        Ok(true)
    }

    /// Moves the collected lines into place and returns their number.
    pub fn commit(self) -> Result<u64> {
        let path = self.out.target().display().to_string();
        self.out.commit()?;
        info!(command = %self.command, lines = self.matched, path = %path, "request filter written");
        Ok(self.matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copies_only_the_filtered_label() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("Request_Statistics.log");
        let mut filter = RequestFilter::create("ID_REQ_KC_STORE", &target).expect("create");

        let lines = [
            "[1] 2021-12-20 10:00:00 CMD-START ID_REQ_KC_STORE",
            "[1] 2021-12-20 10:00:01 CMD-ENDE ID_REQ_KC_STORE rc=0",
            "[2] 2021-12-20 10:00:01 CMD-START ID_REQ_KC_STORE7D3BPACKET",
            "[3] 2021-12-20 10:00:02 CMD-START ID_LOGIN",
            "heartbeat",
        ];
        let copied: Vec<bool> = lines
            .iter()
            .map(|l| filter.process_line(l).expect("process"))
            .collect();
        assert_eq!(copied, vec![true, true, false, false, false]);

        assert_eq!(filter.commit().expect("commit"), 2);
        let text = std::fs::read_to_string(&target).expect("read");
        assert_eq!(text, format!("{}\n{}\n", lines[0], lines[1]));
    }

    #[test]
    fn test_dropped_filter_leaves_no_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("Request_Statistics.log");
        {
            let mut filter = RequestFilter::create("ID_A", &target).expect("create");
            filter
                .process_line("[1] 2021-12-20 10:00:00 CMD-START ID_A")
                .expect("process");
        }
        assert!(!target.exists());
    }
}
