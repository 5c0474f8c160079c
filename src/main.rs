use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use buildmesh::api::WorkerId;
use buildmesh::cache::{ArtifactCache, FileCache};
use buildmesh::client::{BuildListener, Client};
use buildmesh::config::{CoordinatorConfig, WorkerConfig};
use buildmesh::coordinator::{self, Coordinator};
use buildmesh::graph::Graph;
use buildmesh::id::Id;
use buildmesh::scheduler::Scheduler;
use buildmesh::shutdown::install_shutdown_handler;
use buildmesh::worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "buildmesh")]
#[command(about = "A distributed build executor with content-addressed caching")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the build coordinator
    Coordinator {
        /// Port to listen on
        #[arg(long, default_value = "7070")]
        port: u16,

        /// Root directory for the file cache
        #[arg(long, default_value = "buildmesh-cache")]
        cache_dir: PathBuf,
    },
    /// Run a worker attached to a coordinator
    Worker {
        /// Port to listen on
        #[arg(long, default_value = "7071")]
        port: u16,

        /// Coordinator endpoint
        #[arg(long, default_value = "http://127.0.0.1:7070")]
        coordinator: String,

        /// Root directory for the file and artifact caches
        #[arg(long, default_value = "buildmesh-worker-cache")]
        cache_dir: PathBuf,

        /// Endpoint other workers use to fetch artifacts from this worker.
        /// Defaults to "http://127.0.0.1:<port>".
        #[arg(long)]
        advertise: Option<String>,
    },
    /// Submit a build graph and print per-job output
    Build {
        /// Coordinator endpoint
        #[arg(long, default_value = "http://127.0.0.1:7070")]
        coordinator: String,

        /// Directory holding the graph's source files
        #[arg(long, default_value = ".")]
        source_dir: PathBuf,

        /// Path to a JSON-encoded build graph
        #[arg(long)]
        graph: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let shutdown = install_shutdown_handler();

    match args.command {
        Command::Coordinator { port, cache_dir } => {
            let config = CoordinatorConfig {
                listen_addr: listen_addr(port)?,
                cache_dir,
                ..CoordinatorConfig::default()
            };
            run_coordinator(config, shutdown).await
        }
        Command::Worker {
            port,
            coordinator,
            cache_dir,
            advertise,
        } => {
            let config = WorkerConfig {
                listen_addr: listen_addr(port)?,
                coordinator_endpoint: coordinator,
                cache_dir,
                advertise_endpoint: advertise
                    .or_else(|| Some(format!("http://127.0.0.1:{port}"))),
            };
            run_worker(config, shutdown).await
        }
        Command::Build {
            coordinator,
            source_dir,
            graph,
        } => run_build(coordinator, source_dir, graph).await,
    }
}

fn listen_addr(port: u16) -> Result<SocketAddr, std::net::AddrParseError> {
    format!("0.0.0.0:{port}").parse()
}

async fn run_coordinator(
    config: CoordinatorConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let files = Arc::new(FileCache::new(config.cache_dir.join("files"))?);
    let scheduler = Arc::new(Scheduler::new(config.queue_capacity));
    let coordinator = Arc::new(Coordinator::new(files.clone(), scheduler));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "coordinator listening");

    let app = coordinator::http::router(coordinator.clone(), files);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    coordinator.stop();
    Ok(())
}

async fn run_worker(
    config: WorkerConfig,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let files = Arc::new(FileCache::new(config.cache_dir.join("files"))?);
    let artifacts = Arc::new(ArtifactCache::new(config.cache_dir.join("artifacts"))?);

    let worker = Arc::new(Worker::new(
        WorkerId::new(config.endpoint()),
        &config.coordinator_endpoint,
        files,
        artifacts,
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, worker_id = %worker.id(), "worker listening");

    let app = worker.router();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(%error, "worker server failed");
        }
    });

    worker.run(shutdown).await?;
    server.await?;
    Ok(())
}

async fn run_build(
    coordinator: String,
    source_dir: PathBuf,
    graph_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let graph: Graph = serde_json::from_slice(&std::fs::read(&graph_path)?)?;
    let client = Client::new(&coordinator, source_dir);

    let mut listener = PrintListener;
    client.build(graph, &mut listener).await?;
    Ok(())
}

/// Prints each job's output and outcome to the console.
struct PrintListener;

impl BuildListener for PrintListener {
    fn on_job_stdout(&mut self, _job_id: Id, stdout: &str) {
        if !stdout.is_empty() {
            print!("{stdout}");
        }
    }

    fn on_job_stderr(&mut self, _job_id: Id, stderr: &str) {
        if !stderr.is_empty() {
            eprint!("{stderr}");
        }
    }

    fn on_job_finished(&mut self, job_id: Id) {
        tracing::info!(job_id = %job_id, "job finished");
    }

    fn on_job_failed(&mut self, job_id: Id, exit_code: i32, error: &str) {
        tracing::warn!(job_id = %job_id, exit_code, error, "job failed");
    }
}
