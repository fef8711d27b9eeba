use clap::builder::styling::AnsiColor;
use clap::builder::Styles;
use clap::Parser;

use crate::partition::SplitMode;
use crate::pipeline::{PipelineConfig, Stage};

const fn extra_build_info() -> &'static str {
    match option_env!("CARGO_BUILD_DESC") {
        Some(e) => e,
        None => env!("CARGO_PKG_VERSION"),
    }
}
pub const VERSION: &str = extra_build_info();
const INFO_STRING: &str = "
🧬 parallel_augustus version ";
const AFTER_STRING: &str = "
   ──────────────────────────────────
   breaks the input genome into chunks to give to Augustus in parallel";

// colouring of the help
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().bold())
    .usage(AnsiColor::BrightMagenta.on_default().bold())
    .literal(AnsiColor::BrightMagenta.on_default())
    .placeholder(AnsiColor::White.on_default());

#[derive(Parser, Debug)]
#[command(
    version = VERSION,
    about = format!("{}{}{}", INFO_STRING, VERSION, AFTER_STRING),
    arg_required_else_help = true,
    styles = STYLES
)]
pub struct Cli {
    /// the input genome, in FASTA format (may be gzipped)
    #[arg(short, long)]
    pub genome: String,

    /// the output directory, which must not exist yet
    #[arg(short, long, default_value = "parallel_augustus_results")]
    pub output: String,

    /// number of chunks to divide the genome into
    #[arg(short, long, default_value_t = 8, value_parser = parse_positive)]
    pub chunks: usize,

    /// maximum number of Augustus processes running at once. defaults to the number of chunks
    #[arg(short, long, value_parser = parse_positive)]
    pub processes: Option<usize>,

    /// the Augustus executable to launch
    #[arg(long, default_value = "augustus")]
    pub augustus: String,

    /// extra parameters passed verbatim to Augustus. may be given several times,
    /// and each value is split on whitespace, for example:
    ///     --params "--species=human --gff3=on"
    #[arg(long, allow_hyphen_values = true, verbatim_doc_comment)]
    pub params: Vec<String>,

    /// how to split the genome:
    ///   chunks  - balanced groups of records, one file per chunk
    ///   entries - one file per record
    #[arg(long, value_enum, default_value = "chunks", verbatim_doc_comment)]
    pub mode: SplitMode,

    /// the last stage to run. `parse` only reads the genome, `split` stops after writing
    /// the chunk files, `predict` stops before merging the Augustus outputs
    #[arg(long, value_enum, default_value = "merge")]
    pub until: Stage,

    /// merge the outputs of the successful chunks even if some chunks failed.
    /// the exit status is non-zero either way
    #[arg(long, action)]
    pub keep_partial: bool,
}

impl Cli {
    /// Resolves the parsed arguments into the configuration consumed by the pipeline.
    pub fn into_config(self) -> PipelineConfig {
        let params = self
            .params
            .iter()
            .flat_map(|p| p.split_whitespace())
            .map(String::from)
            .collect();

        PipelineConfig {
            genome: self.genome.into(),
            output: self.output.into(),
            mode: self.mode,
            chunks: self.chunks,
            processes: self.processes.unwrap_or(self.chunks),
            augustus: self.augustus,
            params,
            until: self.until,
            keep_partial: self.keep_partial,
        }
    }
}

/// Error type for parsing a count which must be at least one.
#[derive(Debug)]
pub struct ParseCountErr(String);

impl std::fmt::Display for ParseCountErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid count: {}", self.0)
    }
}

impl std::error::Error for ParseCountErr {}

fn parse_positive(arg: &str) -> Result<usize, ParseCountErr> {
    match arg.trim().parse::<usize>() {
        Ok(0) => Err(ParseCountErr(String::from("expected at least 1, got 0"))),
        Ok(v) => Ok(v),
        Err(_) => Err(ParseCountErr(format!(
            "'{arg}' is not a positive integer"
        ))),
    }
}
