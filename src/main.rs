// SPDX-License-Identifier: MIT

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use underwrite_rs::underwrite::engine::checkpoint::ThreadStatus;
use underwrite_rs::underwrite::engine::graph::StepEvent;
use underwrite_rs::underwrite::pipeline::{
    build_service, new_thread_id, progress, scan_folder, ConfigLoader, PipelineService, RunStatus,
};
use underwrite_rs::underwrite::server;

const DEFAULT_CONFIG: &str = "underwrite.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to ./underwrite.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Underwrite the page images in a folder
    Run {
        /// Folder holding the scanned documents
        #[arg(short, long)]
        docs: PathBuf,

        /// Stop at the first pause instead of prompting on stdin
        #[arg(long)]
        no_prompt: bool,
    },
    /// Show the status of a run
    Status { thread_id: String },
    /// Answer the pending prompt of a paused run
    Resume {
        thread_id: String,

        /// Missing information, or SKIP
        #[arg(short, long)]
        input: String,
    },
    /// Print the decision of a finished run
    Result { thread_id: String },
    /// Retry the failed step of a run
    Retry { thread_id: String },
    /// List known runs
    Threads,
    /// Start the HTTP server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.exists()));
    let config = ConfigLoader::new().load(config_path.as_deref())?;
    let service = Arc::new(build_service(&config).await?);

    match args.command {
        Commands::Run { docs, no_prompt } => run(&service, &docs, no_prompt).await?,
        Commands::Status { thread_id } => {
            let status = service.get_status(&thread_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Resume { thread_id, input } => {
            let mut events = service.engine().subscribe();
            let call = service.provide_input(&thread_id, &input);
            let status = progress::follow(&mut events, &thread_id, call, print_progress).await?;
            report(&service, &status).await?;
        }
        Commands::Result { thread_id } => match service.get_result(&thread_id).await? {
            Some(output) => println!("{}", output),
            None => {
                let status = service.get_status(&thread_id).await?;
                bail!("run {} has no result yet (status: {})", thread_id, status.status);
            }
        },
        Commands::Retry { thread_id } => {
            let mut events = service.engine().subscribe();
            let call = service.retry(&thread_id);
            let status = progress::follow(&mut events, &thread_id, call, print_progress).await?;
            report(&service, &status).await?;
        }
        Commands::Threads => {
            for thread_id in service.list_threads().await? {
                let status = service.get_status(&thread_id).await?;
                println!("{}\t{}", thread_id, status.status);
            }
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            server::serve(service, port)
                .await
                .map_err(|e| anyhow::anyhow!("server failed: {}", e))?;
        }
    }

    Ok(())
}

async fn run(service: &PipelineService, docs: &Path, no_prompt: bool) -> anyhow::Result<()> {
    let scan = scan_folder(docs)
        .await
        .with_context(|| format!("cannot read document folder {}", docs.display()))?;
    for pdf in &scan.skipped_pdfs {
        println!("Skipping PDF (convert to images first): {}", pdf.display());
    }
    if scan.images.is_empty() {
        bail!("no supported images found in {}", docs.display());
    }

    println!("Processing {} document(s)", scan.images.len());
    let thread_id = new_thread_id();
    println!("Run id: {}", thread_id);

    let mut events = service.engine().subscribe();
    let call = service.start_run_as(&thread_id, scan.image_paths());
    let mut status = progress::follow(&mut events, &thread_id, call, print_progress).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while status.status == ThreadStatus::Paused && !no_prompt {
        if let Some(prompt) = &status.pending_prompt {
            println!("\n{}", prompt);
        }
        let Some(line) = stdin.next_line().await? else {
            println!("Input closed; resume later with: underwrite resume {} --input <text>", thread_id);
            return Ok(());
        };
        let call = service.provide_input(&thread_id, line.trim());
        status = progress::follow(&mut events, &thread_id, call, print_progress).await?;
    }

    report(service, &status).await
}

fn print_progress(event: StepEvent) {
    if let Some(line) = progress::describe(&event) {
        println!("  {}", line);
    }
}

async fn report(service: &PipelineService, status: &RunStatus) -> anyhow::Result<()> {
    match status.status {
        ThreadStatus::Done => {
            if let Some(error) = &status.error {
                println!("Completed with error: {}", error);
            }
            match service.get_result(&status.thread_id).await? {
                Some(output) => println!("\n--- Underwriting Decision ---\n{}", output),
                None => println!("\n{}", serde_json::to_string_pretty(&status.state)?),
            }
        }
        ThreadStatus::Paused => {
            if let Some(prompt) = &status.pending_prompt {
                println!("{}", prompt);
            }
            println!(
                "Run {} is waiting for input: underwrite resume {} --input <text>",
                status.thread_id, status.thread_id
            );
        }
        other => println!("Run {} is {}", status.thread_id, other),
    }
    Ok(())
}
