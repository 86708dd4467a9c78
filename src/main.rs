use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use serde_json::json;

use dockflow::backend::StorageBackend;
use dockflow::command::CommandRunner;
use dockflow::db::open::open_db;
use dockflow::db::Ledger;
use dockflow::pipeline::{Pipeline, PipelineOptions};
use dockflow::request::message::Message;
use dockflow::request::read::get_message_paths;
use dockflow::request::schema::load_schema;
use dockflow::stages::ligand::CandidateSelection;
use dockflow::stages::tools::ToolConfig;
use dockflow::storage::local::LocalGateway;
use dockflow::storage::s3::{S3Gateway, S3Settings};
use dockflow::storage::StorageGateway;

/// Run docking jobs: prepare ligand and receptor, dock, export the pose and publish the results
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// A job request JSON file, or a directory of them (run in name order)
    #[arg(short, long)]
    request: PathBuf,

    /// Base directory for per-job workspaces
    #[arg(long, default_value = "/tmp/dockflow")]
    scratch_dir: PathBuf,

    /// Job id (default: random). Reusing an id reuses and clears its workspace
    #[arg(long)]
    job_id: Option<String>,

    #[arg(long, value_enum, default_value_t = StorageBackend::S3)]
    backend: StorageBackend,

    /// Bucket for references without an s3:// prefix
    #[arg(long, env = "DOCKFLOW_BUCKET")]
    bucket: Option<String>,

    /// Bucket receiving results (default: --bucket)
    #[arg(long, env = "DOCKFLOW_OUTPUT_BUCKET")]
    output_bucket: Option<String>,

    #[arg(long, env = "AWS_REGION", default_value = "eu-west-1")]
    region: String,

    /// Custom S3 endpoint URL
    #[arg(long, env = "DOCKFLOW_S3_ENDPOINT")]
    endpoint: Option<String>,

    /// Directory used as the object store with --backend local
    #[arg(long)]
    local_root: Option<PathBuf>,

    /// JSON file overriding tool names and locations
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Kill any single tool invocation running longer than this
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Prepared ligand candidate to dock: an index or `first-available`
    #[arg(long, default_value = "0")]
    ligand_candidate: CandidateSelection,

    /// Receptor chain to keep
    #[arg(long, default_value = "A")]
    chain: String,

    /// SQLite ledger recording every job
    #[arg(long)]
    db: Option<PathBuf>,

    /// Leave the job workspace on disk when the job ends
    #[arg(long)]
    keep_workspace: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("terve! starting up :)");

    let args = Args::parse();

    let tools = match &args.tools {
        Some(path) => ToolConfig::load(path)?,
        None => ToolConfig::default(),
    }
    .absolutize()
    .context("Can't resolve tool paths")?;

    let runner = match args.timeout_secs {
        Some(secs) => CommandRunner::with_timeout(Duration::from_secs(secs)),
        None => CommandRunner::new(),
    };

    let ledger: Option<Ledger> = match &args.db {
        Some(path) => Some(open_db(path).with_context(|| format!("Can't open database {}", path.display()))?),
        None => None,
    };

    let options = PipelineOptions {
        scratch_base: args.scratch_dir.clone(),
        candidate: args.ligand_candidate,
        chain: args.chain.clone(),
        keep_workspace: args.keep_workspace,
    };

    let messages = if args.request.is_dir() {
        get_message_paths(&args.request)
            .with_context(|| format!("Can't list job requests in {}", args.request.display()))?
    } else {
        vec![args.request.clone()]
    };
    if messages.is_empty() {
        warn!("No job requests found in {}", args.request.display());
        return Ok(());
    }

    info!("Using {} storage", args.backend);
    match args.backend {
        StorageBackend::S3 => {
            let settings = s3_settings(&args)?;
            let gateway = S3Gateway::connect(&settings)?;
            let pipeline = Pipeline::new(gateway, runner, tools, options);
            run_jobs(&pipeline, &messages, args.job_id.as_deref(), ledger.as_ref()).await
        }
        StorageBackend::Local => {
            let root = args.local_root.clone().context("--backend local needs --local-root")?;
            let pipeline = Pipeline::new(LocalGateway::new(root), runner, tools, options);
            run_jobs(&pipeline, &messages, args.job_id.as_deref(), ledger.as_ref()).await
        }
    }
}

fn s3_settings(args: &Args) -> Result<S3Settings> {
    let output_bucket = args
        .output_bucket
        .clone()
        .or_else(|| args.bucket.clone())
        .context("S3 storage needs --output-bucket or --bucket")?;
    Ok(S3Settings {
        default_bucket: args.bucket.clone(),
        output_bucket,
        region: args.region.clone(),
        endpoint: args.endpoint.clone(),
    })
}

/// Run each request as its own job, printing one JSON line per job on stdout
async fn run_jobs<G: StorageGateway>(
    pipeline: &Pipeline<G>,
    messages: &[PathBuf],
    job_id: Option<&str>,
    ledger: Option<&Ledger>,
) -> Result<()> {
    let mut failed = 0;

    for (n, path) in messages.iter().enumerate() {
        let id = job_id_for(job_id, n, messages.len());
        let response = match read_request(path) {
            Ok(request) => match pipeline.run(&id, &request, ledger).await {
                Ok(result) => json!({"message": "Automation completed successfully", "jobId": id, "result": result}),
                Err(err) => {
                    failed += 1;
                    json!({"jobId": id, "error": err.to_string()})
                }
            },
            Err(err) => {
                failed += 1;
                json!({"request": path, "error": format!("{err:#}")})
            }
        };
        println!("{response}");
    }

    if failed > 0 {
        bail!("{failed} of {} jobs failed", messages.len());
    }
    Ok(())
}

fn read_request(path: &Path) -> Result<dockflow::request::job::JobRequest> {
    let message = Message { path: path.to_path_buf(), compiled_schema: load_schema() };
    Ok(message.read()?)
}

fn job_id_for(given: Option<&str>, n: usize, total: usize) -> String {
    match given {
        Some(id) if total == 1 => id.to_string(),
        Some(id) => format!("{id}-{n}"),
        None => uuid::Uuid::new_v4().simple().to_string(),
    }
}
