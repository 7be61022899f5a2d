use std::collections::HashMap;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde::Serialize;

/// Run-scoped, append-only table of command labels.
///
/// Codes are dense and assigned in first-seen order, starting at 0.
#[derive(Debug, Default, Clone)]
pub struct CommandRegistry {
    codes: HashMap<String, u32>,
    order: Vec<String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the code of `label`, assigning the next one if unseen.
    pub fn intern(&mut self, label: &str) -> u32 {
        if let Some(&code) = self.codes.get(label) {
            return code;
        }
        let code = u32::try_from(self.order.len()).unwrap_or(u32::MAX);
        self.codes.insert(label.to_string(), code);
        self.order.push(label.to_string());
        code
    }

    pub fn code(&self, label: &str) -> Option<u32> {
        self.codes.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Interns every non-empty line of a names file written by
    /// [`Self::write_names`], keeping codes stable across runs.
    pub fn read_names<R: BufRead>(&mut self, input: R) -> Result<usize> {
        let before = self.len();
        for line in input.lines() {
            let line = line.context("reading request names")?;
            let label = line.trim();
            if !label.is_empty() {
                self.intern(label);
            }
        }
        Ok(self.len() - before)
    }

    /// Writes one label per line (`Request_Names.log`).
    pub fn write_names<W: Write>(&self, mut out: W) -> Result<()> {
        for label in &self.order {
            writeln!(out, "{label}").context("writing request name")?;
        }
        out.flush().context("flushing request names")
    }

    /// Writes the label-to-code mapping as JSON (`command_codes.json`).
    pub fn write_codes<W: Write>(&self, out: W) -> Result<()> {
        #[derive(Serialize)]
        struct Entry<'a> {
            command_id: &'a str,
            code: u32,
        }

        let entries: Vec<Entry<'_>> = self
            .order
            .iter()
            .zip(0u32..)
            .map(|(label, code)| Entry {
                command_id: label,
                code,
            })
            .collect();
        serde_json::to_writer_pretty(out, &entries).context("encoding command codes")
    }
}
