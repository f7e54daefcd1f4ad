use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use cnd_cli::config::Settings;
use cnd_cli::document::{PdfTextExtractor, TextExtractor};
use cnd_cli::job::run_job;
use cnd_cli::normalizer::parse_document_text;
use cnd_cli::progress::ProgressLog;
use cnd_cli::server::run_server;
use cnd_cli::tabular::{self, OutputFormat, OutputOptions};

#[derive(Parser)]
#[command(name = "cnd-cli")]
#[command(about = "CPF/CNPJ extraction from municipal tax certificates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a CSV of property codes against the portal
    Process {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Both)]
        format: OutputFormat,

        /// Add source, owner, address, property id and error columns
        #[arg(long, default_value_t = false)]
        detailed: bool,

        #[arg(long, action = clap::ArgAction::Set)]
        headless: Option<bool>,

        #[arg(long)]
        webdriver_url: Option<String>,

        #[arg(long, default_value_t = false)]
        keep_documents: bool,
    },

    /// Serve the upload form endpoints and live logs over HTTP
    Serve {
        #[arg(long, default_value = "0.0.0.0:3000")]
        addr: String,
    },

    /// Print the fields parsed from a local certificate PDF
    Inspect {
        #[arg(long)]
        pdf: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = Settings::from_env().context("Invalid CND_* configuration")?;

    match cli.command {
        Commands::Process {
            file,
            output_dir,
            format,
            detailed,
            headless,
            webdriver_url,
            keep_documents,
        } => {
            if let Some(headless) = headless {
                settings.headless = headless;
            }
            if let Some(url) = webdriver_url {
                settings.webdriver_url = url;
            }
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            settings.keep_documents |= keep_documents;

            info!("Reading property codes from file: {}", file.display());
            let table = tabular::read_csv_file(&file)?;

            let output = OutputOptions {
                dir: settings.output_dir.clone(),
                format,
                detailed,
            };

            let report = run_job(table, &settings, &output, &ProgressLog::new()).await?;

            print!("{}", report.summary);
            for path in report.artifacts.paths() {
                println!("  → {}", path.display());
            }
        }

        Commands::Serve { addr } => {
            run_server(&addr, settings).await?;
        }

        Commands::Inspect { pdf } => {
            let text = PdfTextExtractor
                .extract_text(&pdf)
                .await
                .with_context(|| format!("Failed to read certificate {}", pdf.display()))?;
            let fields = parse_document_text(&text);

            println!("{}", serde_json::to_string_pretty(&fields)?);
        }
    }

    Ok(())
}
