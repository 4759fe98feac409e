//! Shared state handed to every control route: the mounted handler plus the
//! config that produced it (spec.md §6's control interface).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use stratafs_core::config::Config;
use stratafs_core::handler::StrataHandler;

#[derive(Clone)]
pub struct ControlState {
    pub handler: Arc<StrataHandler>,
    pub config: Arc<RwLock<Config>>,
    pub config_path: Option<PathBuf>,
    pub start_time: Instant,
}

impl ControlState {
    pub fn new(handler: Arc<StrataHandler>, config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            handler,
            config: Arc::new(RwLock::new(config)),
            config_path,
            start_time: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
