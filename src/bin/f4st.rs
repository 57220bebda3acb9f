use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use foxsi4_science_tools::app::{App, DEFAULT_TRIES, FetchOptions, SdoDownload};
use foxsi4_science_tools::domain::{ObsTime, Wavelength};
use foxsi4_science_tools::error::F4stError;
use foxsi4_science_tools::jsoc::JsocHttpClient;
use foxsi4_science_tools::obs_info;
use foxsi4_science_tools::output::{ConsoleOutput, JsonOutput, OutputMode};

/// Exit status for a download that finished with files still needed.
const EXIT_PARTIAL: u8 = 4;

#[derive(Parser)]
#[command(name = "f4st")]
#[command(about = "FOXSI-4 science tools: SDO data retrieval and observation information")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Observation information YAML (defaults to the shipped file or $F4ST_OBS_INFO)
    #[arg(long, global = true)]
    obs_info: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "SDO data retrieval")]
    Sdo(SdoArgs),
    #[command(about = "Print observation information (optionally one dotted key)")]
    ObsInfo(ObsInfoArgs),
}

#[derive(Args)]
struct SdoArgs {
    #[command(subcommand)]
    command: SdoCommand,
}

#[derive(Subcommand)]
enum SdoCommand {
    #[command(about = "Download SDO/AIA (and optionally SDO/HMI) data")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct DownloadArgs {
    /// Start time (UTC), e.g. 2024-04-17T21:57:00. Defaults to the flare time of interest.
    #[arg(long)]
    start: Option<ObsTime>,

    /// End time (UTC). Defaults to the flare time of interest.
    #[arg(long)]
    end: Option<ObsTime>,

    /// Output directory. Defaults to the current directory.
    #[arg(long)]
    dir: Option<Utf8PathBuf>,

    /// AIA wavelengths in angstrom. Defaults to the nine standard channels.
    #[arg(long = "wave", value_delimiter = ',')]
    waves: Vec<Wavelength>,

    /// Skip AIA entirely.
    #[arg(long, conflicts_with = "waves")]
    no_aia: bool,

    /// Also download HMI line-of-sight magnetograms.
    #[arg(long)]
    hmi: bool,

    #[arg(long, default_value_t = DEFAULT_TRIES)]
    tries: usize,

    /// Download files again even if they already exist.
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
struct ObsInfoArgs {
    key: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<F4stError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &F4stError) -> u8 {
    match error {
        F4stError::ObsInfoRead(_)
        | F4stError::ObsInfoParse(_)
        | F4stError::MissingObsKey(_)
        | F4stError::InvalidObsValue { .. } => 2,
        F4stError::SearchHttp(_)
        | F4stError::SearchStatus { .. }
        | F4stError::TransferHttp(_)
        | F4stError::TransferStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
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

    let info = obs_info::shared(cli.obs_info.as_deref())?;

    match cli.command {
        Commands::Sdo(SdoArgs {
            command: SdoCommand::Download(args),
        }) => {
            let client = JsocHttpClient::new()?;
            let app = App::new(client, info);
            run_download(args, &app, output_mode)
        }
        Commands::ObsInfo(args) => {
            let text = match args.key {
                Some(key) => {
                    let value = info
                        .lookup(&key)
                        .ok_or(F4stError::MissingObsKey(key))?;
                    serde_yaml::to_string(value)
                        .map_err(|err| F4stError::ObsInfoParse(err.to_string()))?
                }
                None => info.to_yaml_string()?,
            };
            print!("{text}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_download(
    args: DownloadArgs,
    app: &App<JsocHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<ExitCode> {
    let DownloadArgs {
        start,
        end,
        dir,
        waves,
        no_aia,
        hmi,
        tries,
        overwrite,
    } = args;

    let wavelengths = if no_aia {
        Some(Vec::new())
    } else if waves.is_empty() {
        None
    } else {
        Some(waves)
    };
    let request = SdoDownload {
        start_time: start,
        end_time: end,
        directory: dir,
        wavelengths,
        get_hmi: hmi,
    };
    let options = FetchOptions { tries, overwrite };

    let report = match output_mode {
        OutputMode::NonInteractive => {
            let report = app
                .sdo_download_report(request, options, &JsonOutput)?;
            JsonOutput::print_download(&report).into_diagnostic()?;
            report
        }
        OutputMode::Interactive => {
            let report = app
                .sdo_download_report(request, options, &ConsoleOutput)?;
            ConsoleOutput::print_summary(&report);
            report
        }
    };

    if report.needed_files.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL))
    }
}
