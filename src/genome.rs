use needletail::parser::{write_fasta, Format};
use needletail::{parse_fastx_file, FastxReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A single named sequence of the genome.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// The first word of the header line
    pub id: String,
    /// The number of bases in the sequence
    pub len: u64,
    /// The record as it should be written back out, header and sequence lines included
    pub raw: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unable to read genome file {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid FASTA file")]
    InvalidFormat {
        path: PathBuf,
        #[source]
        source: needletail::errors::ParseError,
    },

    #[error("malformed record #{index} in {path}")]
    MalformedRecord {
        path: PathBuf,
        index: usize,
        #[source]
        source: needletail::errors::ParseError,
    },
}

/// Iterates over the records of a FASTA file, in file order. The file is read lazily and only
/// once; open a new `RecordSource` to go through it again.
///
/// Iteration stops after the first `Err` is yielded.
pub struct RecordSource {
    path: PathBuf,
    reader: Option<Box<dyn FastxReader>>,
    index: usize,
}

impl RecordSource {
    /// Opens the genome at `path`. An empty file is a genome with no records, not an error.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if the file cannot be read, or if its first bytes do not look
    /// like a sequence file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let path = path.as_ref().to_path_buf();

        let metadata = std::fs::metadata(&path).map_err(|source| ParseError::Unreadable {
            path: path.clone(),
            source,
        })?;

        // needletail refuses files without at least two bytes in them
        let reader = if metadata.len() == 0 {
            None
        } else {
            let reader = parse_fastx_file(&path).map_err(|source| ParseError::InvalidFormat {
                path: path.clone(),
                source,
            })?;
            Some(reader)
        };

        Ok(Self {
            path,
            reader,
            index: 0,
        })
    }
}

impl Iterator for RecordSource {
    type Item = Result<Record, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        self.index += 1;

        let record = match reader.next()? {
            Ok(rec) => {
                // chunks are always written as FASTA, whatever the input was
                let mut raw = Vec::new();
                let written = match rec.format() {
                    Format::Fasta => rec.write(&mut raw, None),
                    Format::Fastq => {
                        write_fasta(rec.id(), &rec.seq(), &mut raw, rec.line_ending())
                    }
                };
                match written {
                    Ok(()) => Ok(Record {
                        id: first_word(rec.id()),
                        len: rec.seq().len() as u64,
                        raw,
                    }),
                    Err(source) => Err(source),
                }
            }
            Err(source) => Err(source),
        };

        Some(record.map_err(|source| {
            // the reader cannot recover from a malformed record
            self.reader = None;
            ParseError::MalformedRecord {
                path: self.path.clone(),
                index: self.index,
                source,
            }
        }))
    }
}

fn first_word(header: &[u8]) -> String {
    let header = String::from_utf8_lossy(header);
    header.split_whitespace().next().unwrap_or_default().to_string()
}

/// Summary of a first pass through the genome.
#[derive(Debug, Default)]
pub struct GenomeStats {
    /// The length of every record, in file order
    pub lengths: Vec<u64>,
    pub total_bases: u64,
    /// The id and length of the longest record
    pub longest: Option<(String, u64)>,
}

impl GenomeStats {
    pub fn records(&self) -> usize {
        self.lengths.len()
    }
}

/// Reads the whole genome once, keeping only the record lengths.
///
/// # Errors
///
/// Returns the first `ParseError` encountered.
pub fn scan(path: impl AsRef<Path>) -> Result<GenomeStats, ParseError> {
    let mut stats = GenomeStats::default();

    for record in RecordSource::open(path)? {
        let record = record?;
        stats.total_bases += record.len;

        if stats.longest.as_ref().map_or(true, |(_, len)| record.len > *len) {
            stats.longest = Some((record.id, record.len));
        }
        stats.lengths.push(record.len);
    }

    Ok(stats)
}
