use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_expression_prep::app::{Pipeline, ProgressSink};
use kira_expression_prep::config::{ConfigLoader, ResolvedConfig};
use kira_expression_prep::error::PrepError;
use kira_expression_prep::geo::GeoHttpClient;
use kira_expression_prep::output::{JsonOutput, OutputMode, TextOutput};
use kira_expression_prep::resolve::{BiomartResolver, MappingFileResolver, SymbolResolver};
use kira_expression_prep::store::Store;
use kira_expression_prep::validate::validate_identifiers;

#[derive(Parser)]
#[command(name = "kira-ep")]
#[command(about = "Preprocess GEO RNA-seq counts: validate, resolve, aggregate, normalize")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the full preprocessing pipeline")]
    Run(RunArgs),
    #[command(about = "Check transcript identifiers against the accepted pattern")]
    Validate(ValidateArgs),
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    accession: Option<String>,

    #[arg(long)]
    expected_samples: Option<usize>,

    #[arg(long, help = "Local counts table instead of the GEO supplementary file")]
    counts: Option<PathBuf>,

    #[arg(long, help = "Local family SOFT file instead of downloading it")]
    soft: Option<PathBuf>,

    #[arg(long, help = "Two-column transcript to symbol mapping used instead of BioMart")]
    mapping: Option<PathBuf>,

    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(required = true)]
    ids: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<PrepError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PrepError) -> u8 {
    match error {
        PrepError::ConfigRead(_)
        | PrepError::ConfigParse(_)
        | PrepError::InvalidExpressionAccession(_)
        | PrepError::ShapeMismatch { .. }
        | PrepError::MissingDownload(_)
        | PrepError::MetadataMismatch(_) => 2,
        PrepError::GeoHttp(_)
        | PrepError::GeoStatus { .. }
        | PrepError::ResolverHttp(_)
        | PrepError::ResolverStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Validate(args) => {
            let report = validate_identifiers(&args.ids);
            match output_mode {
                OutputMode::Interactive => TextOutput::print_validation(&report),
                OutputMode::NonInteractive => {
                    JsonOutput::print_validation(&report).into_diagnostic()?
                }
            }
            Ok(())
        }
    }
}

fn apply_overrides(mut config: ResolvedConfig, args: &RunArgs) -> miette::Result<ResolvedConfig> {
    if let Some(accession) = &args.accession {
        config.accession = accession.parse()?;
    }
    if let Some(expected) = args.expected_samples {
        if expected == 0 {
            return Err(
                PrepError::ConfigParse("expected samples must be at least 1".to_string()).into(),
            );
        }
        config.expected_samples = expected;
    }
    if args.counts.is_some() {
        config.counts_file = args.counts.clone();
    }
    if args.soft.is_some() {
        config.soft_file = args.soft.clone();
    }
    if args.mapping.is_some() {
        config.mapping_file = args.mapping.clone();
    }
    Ok(config)
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let config = apply_overrides(config, &args)?;
    let store = Store::new()?;
    let geo = GeoHttpClient::new()?;

    match &config.mapping_file {
        Some(path) => {
            let resolver = MappingFileResolver::from_path(path)?;
            execute(Pipeline::new(store, geo, resolver), &config, args.output, output_mode)
        }
        None => {
            let resolver =
                BiomartResolver::with_endpoint(&config.biomart_url, &config.biomart_dataset)?;
            execute(Pipeline::new(store, geo, resolver), &config, args.output, output_mode)
        }
    }
}

fn execute<R: SymbolResolver>(
    pipeline: Pipeline<GeoHttpClient, R>,
    config: &ResolvedConfig,
    output: Option<Utf8PathBuf>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &TextOutput,
        OutputMode::NonInteractive => &JsonOutput,
    };
    let report = pipeline.run(config, output, sink)?;
    match output_mode {
        OutputMode::Interactive => TextOutput::print_report(&report),
        OutputMode::NonInteractive => JsonOutput::print_report(&report).into_diagnostic()?,
    }
    Ok(())
}
