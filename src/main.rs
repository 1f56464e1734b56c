use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand, ValueEnum};
use prost::Message;
use thiserror::Error;
use tracing::{debug, info};

use bqwrite::encode::{row_from_json, EncodeError, RowEncoder};
use bqwrite::observability::{init_logging, LogFormat};
use bqwrite::proto::TableSchema;
use bqwrite::schema::{compile, compile_message, namespace, parse_table_schema, AdaptError, Syntax};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    /// Human-readable logs
    Pretty,
    /// One JSON object per line
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSyntax {
    Proto2,
    Proto3,
}

impl From<CliSyntax> for Syntax {
    fn from(syntax: CliSyntax) -> Self {
        match syntax {
            CliSyntax::Proto2 => Syntax::Proto2,
            CliSyntax::Proto3 => Syntax::Proto3,
        }
    }
}

/// Table schema compiler and row encoder for the streaming write API
#[derive(Parser, Debug)]
#[command(name = "bqwrite", version, about)]
struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: CliLogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a table schema into a protobuf descriptor set
    Compile(CompileArgs),

    /// Encode JSON rows against a table schema
    Encode(EncodeArgs),
}

#[derive(Parser, Debug)]
struct CompileArgs {
    /// Table schema JSON file
    #[arg(long)]
    schema: PathBuf,

    /// Name of the root message
    #[arg(long, default_value = "root")]
    scope: String,

    #[arg(long, value_enum, default_value = "proto2")]
    syntax: CliSyntax,

    /// Write the encoded descriptor set here instead of stdout
    #[arg(short, long, conflicts_with = "layout")]
    output: Option<PathBuf>,

    /// Print the compiled message layout as JSON
    #[arg(long)]
    layout: bool,
}

#[derive(Parser, Debug)]
struct EncodeArgs {
    /// Table schema JSON file
    #[arg(long)]
    schema: PathBuf,

    /// Newline-delimited JSON rows
    #[arg(long)]
    rows: PathBuf,

    /// Convert date and time values to their wire encoding
    #[arg(long)]
    convert_dates: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Schema(#[from] AdaptError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },

    #[error("line {0}: row is not a JSON object")]
    NotAnObject(usize),

    #[error(transparent)]
    Output(#[from] io::Error),
}

impl CliError {
    fn is_broken_pipe(&self) -> bool {
        matches!(self, CliError::Output(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format.into());

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let result = match cli.command {
        Commands::Compile(args) => run_compile(&args, &mut out),
        Commands::Encode(args) => run_encode(&args, &mut out),
    }
    .and_then(|()| out.flush().map_err(CliError::from));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        // Downstream closed early (e.g. piped to `head`).
        Err(e) if e.is_broken_pipe() => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn read_schema(path: &Path) -> Result<TableSchema, CliError> {
    let json = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let schema = parse_table_schema(&json)?;
    debug!(path = %path.display(), fields = schema.fields.len(), "read table schema");
    Ok(schema)
}

fn run_compile(args: &CompileArgs, out: &mut impl Write) -> Result<(), CliError> {
    let schema = read_schema(&args.schema)?;
    let fds = compile(&schema, &args.scope, args.syntax.into())?;

    if args.layout {
        let layout = serde_json::to_string_pretty(&namespace(&fds)).map_err(AdaptError::from)?;
        writeln!(out, "{layout}")?;
        return Ok(());
    }

    let bytes = fds.encode_to_vec();
    match &args.output {
        Some(path) => {
            fs::write(path, &bytes).map_err(|source| CliError::Io {
                path: path.clone(),
                source,
            })?;
            info!(
                path = %path.display(),
                files = fds.file.len(),
                bytes = bytes.len(),
                "wrote descriptor set"
            );
        }
        None => out.write_all(&bytes)?,
    }
    Ok(())
}

fn run_encode(args: &EncodeArgs, out: &mut impl Write) -> Result<(), CliError> {
    let schema = read_schema(&args.schema)?;
    let descriptor = compile_message(&schema, "root", Syntax::Proto2)?;
    let encoder = RowEncoder::new(descriptor).with_date_conversion(args.convert_dates);

    let file = fs::File::open(&args.rows).map_err(|source| CliError::Io {
        path: args.rows.clone(),
        source,
    })?;

    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|source| CliError::Io {
            path: args.rows.clone(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line).map_err(|source| {
            CliError::Json {
                line: line_no,
                source,
            }
        })?;
        rows.push(row_from_json(value).ok_or(CliError::NotAnObject(line_no))?);
    }

    let encoded = encoder.encode(&rows)?;
    for row in &encoded {
        writeln!(out, "{}", BASE64.encode(row))?;
    }
    info!(rows = encoded.len(), "encoded rows");
    Ok(())
}
