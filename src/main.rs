use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docent::{api, bootstrap, config, logging, orchestrator::ConversationService};
use tokio::net::TcpListener;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docent",
    about = "Conversational retrieval over a knowledge base and uploaded documents"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Ingest a PDF, or every PDF under a directory, into the knowledge base.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,
    },
    /// Print the number of chunks in the knowledge base.
    Status,
    /// Delete every chunk from the knowledge base.
    Reset {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("failed to load configuration")?;
    logging::init_tracing();

    let service = bootstrap::build_service(config)
        .await
        .context("failed to initialize services")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service, config.server_port).await,
        Command::Ingest { path } => ingest(&service, &path).await,
        Command::Status => {
            let count = service
                .knowledge_base_status()
                .await
                .context("failed to read knowledge base status")?;
            println!("{count} chunks in knowledge base");
            Ok(())
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("refusing to delete the knowledge base without --yes");
            }
            service
                .reset_knowledge_base()
                .await
                .context("failed to reset knowledge base")?;
            println!("knowledge base reset");
            Ok(())
        }
    }
}

async fn serve(service: ConversationService, server_port: Option<u16>) -> Result<()> {
    let app = api::create_router(Arc::new(service));
    let (listener, port) = bind_listener(server_port).await.context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server terminated")?;
    Ok(())
}

async fn ingest(service: &ConversationService, path: &Path) -> Result<()> {
    let files = pdf_files(path)?;
    if files.is_empty() {
        bail!("no .pdf files found under {}", path.display());
    }

    let mut failures = 0;
    for file in &files {
        let filename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;
        match service.ingest_document(&filename, bytes).await {
            Ok(outcome) => println!(
                "{}: {} chunks, {} indexed, {} duplicates skipped, {} questions",
                outcome.document,
                outcome.chunk_count,
                outcome.indexed,
                outcome.skipped_duplicates,
                outcome.questions_generated
            ),
            Err(error) => {
                failures += 1;
                tracing::error!(file = %file.display(), %error, "Ingestion failed");
                eprintln!("{}: {error}", file.display());
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} files failed to ingest", files.len());
    }
    Ok(())
}

fn pdf_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", path.display()))?;
        let is_pdf = entry
            .path()
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"));
        if entry.file_type().is_file() && is_pdf {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

async fn bind_listener(server_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
