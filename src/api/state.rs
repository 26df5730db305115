use std::sync::Arc;

use crate::config::Config;
use crate::engine::Ipx;
use crate::observability::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Ipx,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, engine: Ipx) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            metrics: Arc::new(Metrics::new()),
        }
    }
}
