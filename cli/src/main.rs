use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use refbundle_core::{
    bundle, dereference, emit, CircularPolicy, EmitOptions, FsSourceIo, OutputFormat,
    ResolveOptions, SourceId,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "refbundle")]
#[command(about = "Bundle or dereference $ref pointers in multi-file JSON/YAML API descriptions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print the full error cause chain on failure
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bundle a multi-file document into a single file
    Bundle {
        /// Root document (JSON or YAML)
        file: PathBuf,

        /// Fully dereference all $ref pointers instead of bundling
        #[arg(short = 'r', long)]
        dereference: bool,

        /// Output format
        #[arg(short = 't', long = "type", value_enum, default_value_t = FormatArg::Json)]
        output_type: FormatArg,

        /// Indentation width (0 = compact JSON)
        #[arg(short = 'f', long = "format", default_value_t = 2)]
        indent: usize,

        /// Fold long YAML strings at this column
        #[arg(short = 'w', long)]
        wrap: Option<usize>,

        /// Output file (defaults to stdout if not specified)
        #[arg(short = 'o', long)]
        outfile: Option<PathBuf>,

        /// What --dereference does with circular references
        #[arg(long, value_enum, default_value_t = CircularArg::Ignore)]
        circular: CircularArg,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum FormatArg {
    Json,
    Yaml,
}

impl From<FormatArg> for OutputFormat {
    fn from(val: FormatArg) -> Self {
        match val {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Yaml => OutputFormat::Yaml,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CircularArg {
    Ignore,
    Error,
}

impl From<CircularArg> for CircularPolicy {
    fn from(val: CircularArg) -> Self {
        match val {
            CircularArg::Ignore => CircularPolicy::Ignore,
            CircularArg::Error => CircularPolicy::Error,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for output
    let log_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if cli.debug {
                eprintln!("{:?}", err);
            } else {
                eprintln!("{}", err);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Bundle {
            file,
            dereference: full,
            output_type,
            indent,
            wrap,
            outfile,
            circular,
        } => {
            let root = SourceId::from_path(&file)
                .with_context(|| format!("Invalid input path: {}", file.display()))?;

            let options = ResolveOptions {
                circular: circular.into(),
                ..ResolveOptions::default()
            };

            let resolved = if full {
                dereference(&root, &FsSourceIo, &options)?
            } else {
                bundle(&root, &FsSourceIo, &options)?
            };

            for circular in &resolved.circular_refs {
                tracing::debug!(location = %circular.location, pointer = %circular.pointer, "circular $ref");
            }

            let emit_options = EmitOptions {
                format: output_type.into(),
                indent,
                wrap,
            };
            let text = emit(&resolved.tree, &emit_options).context("Failed to serialize output")?;

            write_output(&text, outfile.as_deref())?;
            if let Some(path) = outfile {
                println!("Created {} from {}", path.display(), file.display());
            }
        }
    }

    Ok(())
}

fn write_output(text: &str, path: Option<&Path>) -> Result<()> {
    let mut writer: Box<dyn Write> = if let Some(p) = path {
        let file = File::create(p)
            .with_context(|| format!("Failed to create output file: {}", p.display()))?;
        Box::new(BufWriter::new(file))
    } else {
        Box::new(BufWriter::new(io::stdout()))
    };

    // Ensure trailing newline
    writeln!(writer, "{}", text).context("Failed to write output")?;
    writer.flush().context("Failed to write output")?;

    Ok(())
}
