use async_trait::async_trait;
use serde_json::Value;

use super::JobHandler;
use crate::types::{Job, Record};

/// Returns the selected records as they are.
pub struct DataHandler;

#[async_trait]
impl JobHandler for DataHandler {
    async fn handle(&self, _job: &Job, selection: &[Record]) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(selection)?)
    }
}
