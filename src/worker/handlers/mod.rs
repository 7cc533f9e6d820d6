use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf as PathBuf;
use serde_json::Value;

use crate::types::{Job, Record, WorkType};

pub mod data;
pub mod graph;
pub mod stats;

pub use data::DataHandler;
pub use graph::{ChartUpload, GraphHandler};
pub use stats::StatsHandler;

/// Computes the results of one job over the records its selector picked.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, selection: &[Record]) -> anyhow::Result<Value>;
}

pub struct HandlerConfig {
    pub chart_dir: PathBuf,
    pub chart_upload: Option<ChartUpload>,
}

pub fn for_work_type(work_type: WorkType, config: &HandlerConfig) -> Arc<dyn JobHandler> {
    match work_type {
        WorkType::Data => Arc::new(DataHandler),
        WorkType::Stats => Arc::new(StatsHandler),
        WorkType::Graph => Arc::new(GraphHandler::new(
            config.chart_dir.clone(),
            config.chart_upload.clone(),
        )),
    }
}
