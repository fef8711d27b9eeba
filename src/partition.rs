use crate::genome::{ParseError, Record, RecordSource};
use anyhow::{bail, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How records are grouped into the files handed to Augustus.
#[derive(clap::ValueEnum, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Balanced groups of records, one file per chunk
    Chunks,
    /// One file per record
    Entries,
}

impl SplitMode {
    /// The name of the directory holding the split files.
    pub fn dir_name(&self) -> &'static str {
        match self {
            SplitMode::Chunks => "chunks",
            SplitMode::Entries => "entries",
        }
    }

    /// The prefix of every split file, which is followed by `_<index>`.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            SplitMode::Chunks => "chunk",
            SplitMode::Entries => "entry",
        }
    }
}

/// A group of consecutive records written to a single file.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    /// 1-based position of the chunk
    pub index: usize,
    /// Ids of the records in this chunk, in input order
    pub records: Vec<String>,
    pub total_bases: u64,
    pub path: PathBuf,
}

impl Chunk {
    /// The file name of the chunk without its extension, e.g. `chunk_3`.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("chunk_{}", self.index))
    }
}

#[derive(Error, Debug)]
#[error("could not write chunk file {path}")]
pub struct ChunkWriteError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Assigns records to chunks in a single forward pass.
///
/// The current chunk is closed once it holds at least `total_bases / target_chunks` bases, or
/// once there are no more records left than chunks which have not been opened yet. The last
/// chunk never closes and takes whatever remains. Records are never split.
#[derive(Debug)]
pub struct Partitioner {
    target_chunks: usize,
    ideal_size: f64,
    record_count: usize,
    seen: usize,
    current: usize,
    filled: u64,
}

impl Partitioner {
    pub fn new(total_bases: u64, record_count: usize, target_chunks: usize) -> Self {
        let target_chunks = target_chunks.max(1);
        Self {
            target_chunks,
            ideal_size: total_bases as f64 / target_chunks as f64,
            record_count,
            seen: 0,
            current: 1,
            filled: 0,
        }
    }

    /// Returns the 1-based chunk index of the next record, which has `len` bases.
    pub fn assign(&mut self, len: u64) -> usize {
        let index = self.current;
        self.filled += len;
        self.seen += 1;

        let remaining = self.record_count.saturating_sub(self.seen);
        let unopened = self.target_chunks - self.current;

        let full = self.filled as f64 >= self.ideal_size;
        if self.current < self.target_chunks && remaining > 0 && (full || remaining <= unopened) {
            self.current += 1;
            self.filled = 0;
        }

        index
    }
}

/// Computes the chunk index of each record, given the record lengths in input order.
pub fn assign_chunks(lengths: &[u64], target_chunks: usize) -> Vec<usize> {
    let total = lengths.iter().sum();
    let mut partitioner = Partitioner::new(total, lengths.len(), target_chunks);
    lengths.iter().map(|len| partitioner.assign(*len)).collect()
}

/// The chunks produced by a split, along with the number which was asked for.
#[derive(Debug, Serialize)]
pub struct SplitReport {
    pub requested: usize,
    pub chunks: Vec<Chunk>,
}

impl SplitReport {
    /// The number of chunks which actually contain records.
    pub fn actual(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_bases(&self) -> u64 {
        self.chunks.iter().map(|c| c.total_bases).sum()
    }

    /// The median chunk size in bases, or 0 if there are no chunks.
    pub fn median_size(&self) -> f64 {
        let mut sizes: Vec<u64> = self.chunks.iter().map(|c| c.total_bases).collect();
        sizes.sort_unstable();

        let n = sizes.len();
        match n {
            0 => 0.0,
            _ if n % 2 == 1 => sizes[n / 2] as f64,
            _ => (sizes[n / 2 - 1] + sizes[n / 2]) as f64 / 2.0,
        }
    }
}

/// Writes each record into the chunk file given by `assignment`, which holds one 1-based chunk
/// index per record. Chunk files are named `<prefix>_<index>.fasta` inside `dir`, and only
/// chunks which receive at least one record are created.
///
/// # Errors
///
/// Returns an error if a record cannot be parsed, if there are more records than
/// assignments, or if a chunk file cannot be written. A failed split leaves an unusable
/// partial set of chunk files behind.
pub fn write_chunks<I>(
    records: I,
    assignment: &[usize],
    dir: &Path,
    prefix: &str,
) -> Result<Vec<Chunk>>
where
    I: IntoIterator<Item = Result<Record, ParseError>>,
{
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut writer: Option<BufWriter<File>> = None;

    for (i, record) in records.into_iter().enumerate() {
        let record = record?;

        let Some(&index) = assignment.get(i) else {
            bail!(
                "genome changed while it was being split: found more than {} records",
                assignment.len()
            );
        };

        if chunks.last().map(|c| c.index) != Some(index) {
            if let (Some(mut w), Some(chunk)) = (writer.take(), chunks.last()) {
                finish(&mut w, &chunk.path)?;
            }

            let path = dir.join(format!("{prefix}_{index}.fasta"));
            let file = File::create(&path).map_err(|source| ChunkWriteError {
                path: path.clone(),
                source,
            })?;
            writer = Some(BufWriter::new(file));
            chunks.push(Chunk {
                index,
                records: Vec::new(),
                total_bases: 0,
                path,
            });
        }

        // both are always set above
        if let (Some(w), Some(chunk)) = (writer.as_mut(), chunks.last_mut()) {
            w.write_all(&record.raw).map_err(|source| ChunkWriteError {
                path: chunk.path.clone(),
                source,
            })?;
            chunk.total_bases += record.len;
            chunk.records.push(record.id);
        }
    }

    if let (Some(mut w), Some(chunk)) = (writer.take(), chunks.last()) {
        finish(&mut w, &chunk.path)?;
    }

    Ok(chunks)
}

fn finish(writer: &mut BufWriter<File>, path: &Path) -> Result<(), ChunkWriteError> {
    writer.flush().map_err(|source| ChunkWriteError {
        path: path.to_path_buf(),
        source,
    })
}

/// Splits the genome at `genome` into files inside `dir`, using the record lengths from a
/// previous pass over the same file.
///
/// In `Chunks` mode the records are balanced over `target_chunks` files; in `Entries` mode
/// every record gets its own file and `target_chunks` is ignored.
pub fn split_genome(
    genome: &Path,
    lengths: &[u64],
    dir: &Path,
    mode: SplitMode,
    target_chunks: usize,
) -> Result<SplitReport> {
    let (assignment, requested) = match mode {
        SplitMode::Chunks => (assign_chunks(lengths, target_chunks), target_chunks),
        SplitMode::Entries => ((1..=lengths.len()).collect(), lengths.len()),
    };

    info!(
        "Splitting {} into {} {} in {}",
        genome.display(),
        requested,
        mode.dir_name(),
        dir.display()
    );

    let records = RecordSource::open(genome)?;
    let chunks = write_chunks(records, &assignment, dir, mode.file_prefix())?;

    Ok(SplitReport { requested, chunks })
}
