use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// The line which closes the comment header of an Augustus output file.
pub const HEADER_SENTINEL: &[u8] = b"#";

/// A problem with a single output file which did not stop the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MergeAnomaly {
    /// The file never closed its header, so none of it was merged
    MissingSentinel(PathBuf),
}

impl std::fmt::Display for MergeAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeAnomaly::MissingSentinel(path) => {
                write!(f, "{} has no end-of-header line, skipped", path.display())
            }
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct MergeReport {
    /// Number of output files read
    pub files: usize,
    pub body_lines: usize,
    pub anomalies: Vec<MergeAnomaly>,
}

/// Lists the `.gff` files of `dir`, ordered by the chunk number at the end of their name so
/// that `chunk_2.gff` comes before `chunk_10.gff`. Files without a number come last, by name.
pub fn collect_outputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let re = Regex::new(r"_(\d+)$")?;

    let mut files = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Unable to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "gff") {
            files.push(path);
        }
    }

    let key = |path: &PathBuf| {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let number = re
            .captures(&stem)
            .and_then(|c| c[1].parse::<u64>().ok())
            .unwrap_or(u64::MAX);
        (number, stem)
    };
    files.sort_by_cached_key(key);

    Ok(files)
}

/// Merges every `.gff` file in `output_dir` into `combined`. See `merge_files`.
pub fn merge(output_dir: &Path, combined: &Path) -> Result<MergeReport> {
    let files = collect_outputs(output_dir)?;
    merge_files(&files, combined)
}

/// Writes the body of every file in `files`, in order, into `combined`, which is truncated
/// first. The header of each file (everything up to and including the sentinel line) is
/// dropped, and lines are written with `\n` endings.
///
/// # Errors
///
/// Fails if a file cannot be read or the output cannot be written. A file without a
/// sentinel is not an error; it is recorded as an anomaly in the report.
pub fn merge_files(files: &[PathBuf], combined: &Path) -> Result<MergeReport> {
    info!("Merging {} Augustus outputs into {}", files.len(), combined.display());

    let out = File::create(combined)
        .with_context(|| format!("Unable to create {}", combined.display()))?;
    let mut out = BufWriter::new(out);

    let mut report = MergeReport::default();

    for path in files {
        let file = File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;

        let lines = append_body(BufReader::new(file), &mut out)
            .with_context(|| format!("Unable to merge {}", path.display()))?;

        report.files += 1;
        match lines {
            Some(n) => report.body_lines += n,
            None => {
                let anomaly = MergeAnomaly::MissingSentinel(path.clone());
                warn!("{anomaly}");
                report.anomalies.push(anomaly);
            }
        }
    }

    out.flush()
        .with_context(|| format!("Unable to write {}", combined.display()))?;

    Ok(report)
}

/// Skips the header of `reader` and copies the remaining lines to `writer`. Returns the
/// number of lines copied, or `None` if the sentinel was never found.
fn append_body(reader: impl BufRead, writer: &mut impl Write) -> std::io::Result<Option<usize>> {
    let mut in_header = true;
    let mut copied = 0;

    for line in reader.split(b'\n') {
        let line = line?;
        let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);

        if in_header {
            in_header = line != HEADER_SENTINEL;
            continue;
        }

        writer.write_all(line)?;
        writer.write_all(b"\n")?;
        copied += 1;
    }

    Ok(if in_header { None } else { Some(copied) })
}
