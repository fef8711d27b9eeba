use crate::launch::ExecutionSummary;
use crate::merge::MergeReport;
use crate::partition::{SplitMode, SplitReport};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Everything worth knowing about a finished run, written as JSON next to the logs.
#[derive(Serialize, Default)]
pub struct RunSummary<'a> {
    pub version: String,
    pub start_date: String,
    pub elapsed: f64,
    pub genome: String,
    pub mode: Option<SplitMode>,
    pub record_count: usize,
    pub total_bases: u64,
    pub requested_chunks: usize,
    pub actual_chunks: usize,
    pub median_chunk_size: f64,
    pub split: Option<&'a SplitReport>,
    pub execution: Option<&'a ExecutionSummary>,
    pub merge: Option<&'a MergeReport>,
    pub succeeded: bool,
}

impl RunSummary<'_> {
    /// Writes the summary to `path` as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, self).context("Could not serialize summary")?;
        writeln!(writer)?;
        writer.flush()?;

        info!("Wrote run summary to {}", path.display());
        Ok(())
    }
}
