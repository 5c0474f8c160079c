use std::net::SocketAddr;
use std::path::PathBuf;

use crate::scheduler::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    /// Root directory of the coordinator's file cache.
    pub cache_dir: PathBuf,
    pub queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7070".parse().expect("static address"),
            cache_dir: PathBuf::from("buildmesh-cache"),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub listen_addr: SocketAddr,
    pub coordinator_endpoint: String,
    /// Root directory holding the worker's file and artifact caches.
    pub cache_dir: PathBuf,
    /// Endpoint other processes use to reach this worker. Defaults to the
    /// listen address over plain HTTP.
    pub advertise_endpoint: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7071".parse().expect("static address"),
            coordinator_endpoint: "http://127.0.0.1:7070".to_string(),
            cache_dir: PathBuf::from("buildmesh-worker-cache"),
            advertise_endpoint: None,
        }
    }
}

impl WorkerConfig {
    /// The endpoint this worker advertises as its identity.
    pub fn endpoint(&self) -> String {
        self.advertise_endpoint
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.listen_addr))
    }
}
