use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::Registry;

lazy_static::lazy_static! {
    pub static ref JOBS_SUBMITTED: Counter = Default::default();
    pub static ref JOBS_COMPLETED: Counter = Default::default();
    pub static ref JOBS_FAILED: Counter = Default::default();
    pub static ref RECORDS_MERGED: Counter = Default::default();
    pub static ref BAD_REQUEST: Counter = Default::default();
    pub static ref DATASET_RECORDS: Gauge = Default::default();
}

pub fn register_metrics(registry: &mut Registry, info: Info<Vec<(String, String)>>) {
    registry.register("sunspot_jobs_info", "Service info", info);
    registry.register(
        "num_jobs_submitted",
        "Number of jobs accepted for processing",
        JOBS_SUBMITTED.clone(),
    );
    registry.register(
        "num_jobs_completed",
        "Number of jobs whose handler succeeded",
        JOBS_COMPLETED.clone(),
    );
    registry.register(
        "num_jobs_failed",
        "Number of jobs whose handler failed",
        JOBS_FAILED.clone(),
    );
    registry.register(
        "num_records_merged",
        "Number of records appended to the dataset",
        RECORDS_MERGED.clone(),
    );
    registry.register(
        "num_bad_requests",
        "Number of rejected inputs",
        BAD_REQUEST.clone(),
    );
    registry.register(
        "dataset_records",
        "Number of records in the current dataset",
        DATASET_RECORDS.clone(),
    );
}
