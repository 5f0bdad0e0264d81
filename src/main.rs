use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use aozora2epub::{
    validate_all, ArchiveValidator, Assembler, BookRequest, Config, EpubWriter, Epubcheck,
    HttpFetcher, StructuralCheck,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "aozora2epub")]
#[command(about = "CLI utility to turn an Aozora Bunko work page into an EPUB for offline reading")]
#[command(version = "0.1.0")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a work page and convert it to an EPUB file
    Convert {
        /// URL of the work page (e.g. https://www.aozora.gr.jp/cards/000051/files/47086_27953.html)
        url: String,

        /// Title of the work
        #[arg(long)]
        title: String,

        /// Author of the work
        #[arg(long)]
        author: String,

        /// Card ID of the work
        #[arg(long = "card_id")]
        card_id: String,

        /// File ID of the work
        #[arg(long = "file_id")]
        file_id: String,

        /// Description of the work
        #[arg(long, default_value = "")]
        description: String,

        /// Output directory used to save the EPUB
        #[arg(short = 'o', long = "outDir", default_value = ".")]
        out_dir: PathBuf,

        /// Request timeout in seconds (0 disables it)
        #[arg(short = 't', long = "timeout", default_value = "30.0", value_parser = parse_timeout)]
        timeout: f64,

        /// Language code of the work
        #[arg(long, default_value = "ja")]
        language: String,

        /// Skip TLS certificate verification
        #[arg(long)]
        insecure: bool,
    },
    /// Check the structure of an existing EPUB file
    Check {
        /// EPUB file to check
        file: PathBuf,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_timeout(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if value < 0.0 {
        return Err("Must be zero or positive number.".to_string());
    }
    Ok(value)
}

async fn convert(config: Config, request: BookRequest) -> Result<()> {
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let writer = EpubWriter::new();
    let epubcheck = Epubcheck::default();

    let assembler = Assembler::new(config, request);
    assembler.run(&fetcher, &writer, Some(&epubcheck)).await?;
    Ok(())
}

fn check(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        return Err(anyhow::anyhow!("File '{}' does not exist", file.display()));
    }

    let structural = StructuralCheck::new();
    let epubcheck = Epubcheck::default();
    let validators: [&dyn ArchiveValidator; 2] = [&structural, &epubcheck];
    let reports = validate_all(file, &validators);

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            if report.valid {
                info!("{}: {}", report.validator, "valid".green());
            } else {
                warn!("{}: {}", report.validator, "invalid".red());
                for message in &report.messages {
                    warn!("  {}", message);
                }
            }
        }
    }

    if reports.iter().all(|report| report.valid) {
        Ok(())
    } else {
        Err(anyhow::anyhow!("'{}' failed validation", file.display()))
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env()
        .add_directive("aozora2epub=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Convert {
            url,
            title,
            author,
            card_id,
            file_id,
            description,
            out_dir,
            timeout,
            language,
            insecure,
        } => {
            let config = Config::new(out_dir)
                .with_timeout_seconds(timeout)
                .with_language(language)
                .accept_invalid_certs(insecure);
            let request = BookRequest {
                url,
                title,
                author,
                card_id,
                file_id,
                description,
            };
            convert(config, request).await
        }
        Commands::Check { file, json } => check(&file, json),
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {}", e).red());
        process::exit(1);
    }
}
