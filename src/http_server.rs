use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json,
};
use prometheus_client::{encoding::text::encode, registry::Registry};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    context::AppContext,
    error::ApiError,
    filter::filter,
    types::{Job, NewRecord, RawSelector, Selector, ValidationError, WorkType},
};

const NOT_COMPLETED: &str = "Your job is not yet completed.";

async fn get_spots(
    ctx: AppContext,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let selector = Selector::parse(&RawSelector::from_query(&params))?;
    let records = ctx.dataset.read_all().await?;
    Ok(Json(json!(filter(&records, &selector))))
}

async fn post_spots(ctx: AppContext, body: Bytes) -> Result<&'static str, ApiError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ValidationError::single(format!("Body must be JSON: {e}")))?;
    let records = NewRecord::parse_batch(&payload)?;
    let summary = ctx.dataset.merge(records).await?;
    info!("Merged {} records, dataset has {}", summary.added, summary.total);
    Ok("Your additions went through!")
}

async fn get_spot_by_id(ctx: AppContext, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id: usize = id
        .parse()
        .map_err(|_| ValidationError::single("Input for 'id' must be an int"))?;
    let records = ctx.dataset.read_all().await?;
    match filter(&records, &Selector::by_id(id)).first() {
        Some(record) => Ok(Json(json!(record))),
        None => Err(ApiError::NotFound(format!("No record with id {id}"))),
    }
}

async fn get_spot_by_year(
    ctx: AppContext,
    Path(year): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let year: u32 = year
        .parse()
        .map_err(|_| ValidationError::single("Input for 'year' must be an int"))?;
    let records = ctx.dataset.read_all().await?;
    match filter(&records, &Selector::by_year(year)).first() {
        Some(record) => Ok(Json(json!(record))),
        None => Err(ApiError::NotFound(format!("No record for year {year}"))),
    }
}

async fn submit_job(
    ctx: AppContext,
    work_type: WorkType,
    body: Bytes,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let selector = parse_selector_body(&body)?;
    let job = ctx.submit_job(work_type, selector).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn submit_typed_job(
    ctx: AppContext,
    Path(work_type): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let work_type: WorkType = work_type.parse()?;
    submit_job(ctx, work_type, body).await
}

fn parse_selector_body(body: &[u8]) -> Result<Selector, ValidationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Selector::default());
    }
    let raw: RawSelector = serde_json::from_slice(body).map_err(|e| {
        ValidationError::single(format!(
            "Body must be a JSON object with any of 'start', 'end', 'limit', 'offset': {e}"
        ))
    })?;
    Selector::parse(&raw)
}

async fn list_jobs(ctx: AppContext) -> Result<Json<Vec<Job>>, ApiError> {
    let mut jobs = ctx.jobs.list_all().await?;
    jobs.sort_by_key(|job| job.created_at);
    Ok(Json(jobs))
}

async fn get_job(ctx: AppContext, Path(id): Path<String>) -> Result<Json<Job>, ApiError> {
    Ok(Json(ctx.jobs.get(&id).await?))
}

async fn get_job_results(ctx: AppContext, Path(id): Path<String>) -> Result<Response, ApiError> {
    let job = ctx.jobs.get(&id).await?;
    Ok(results_view(&job))
}

/// What a client sees when asking for a job's results. A failed job has no
/// results either; its status is on `/jobs/:key`.
fn results_view(job: &Job) -> Response {
    match &job.results {
        Some(results) => Json(results.clone()).into_response(),
        None => NOT_COMPLETED.into_response(),
    }
}

async fn get_status(ctx: AppContext) -> Result<Json<Value>, ApiError> {
    let records = ctx.dataset.read_all().await?;
    let mut queues = serde_json::Map::new();
    for work_type in WorkType::ALL {
        let depth = ctx.queues.depth(work_type).await?;
        queues.insert(work_type.queue_name().to_owned(), json!(depth));
    }
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "dataset": {
            "file": ctx.dataset.file_path().as_str(),
            "records": records.len(),
        },
        "queues": queues,
    })))
}

async fn get_metrics(registry: Arc<Registry>) -> Result<String, ApiError> {
    let mut buffer = String::new();
    encode(&mut buffer, &registry).map_err(|e| ApiError::Other(e.into()))?;
    Ok(buffer)
}

pub struct Server {
    router: axum::Router,
}

impl Server {
    pub fn new(ctx: AppContext, metrics_registry: Registry) -> Self {
        let metrics_registry = Arc::new(metrics_registry);
        let router = axum::Router::new()
            .route(
                "/spots",
                get({
                    let ctx = ctx.clone();
                    move |query| get_spots(ctx, query)
                })
                .post({
                    let ctx = ctx.clone();
                    move |body| post_spots(ctx, body)
                }),
            )
            .route(
                "/spots/ids/:id",
                get({
                    let ctx = ctx.clone();
                    move |path| get_spot_by_id(ctx, path)
                }),
            )
            .route(
                "/spots/years/:year",
                get({
                    let ctx = ctx.clone();
                    move |path| get_spot_by_year(ctx, path)
                }),
            )
            .route(
                "/jobs",
                get({
                    let ctx = ctx.clone();
                    move || list_jobs(ctx)
                })
                .post({
                    let ctx = ctx.clone();
                    move |body| submit_job(ctx, WorkType::Data, body)
                }),
            )
            // A single segment after /jobs is a job id on GET and a work type on POST
            .route(
                "/jobs/:key",
                get({
                    let ctx = ctx.clone();
                    move |path| get_job(ctx, path)
                })
                .post({
                    let ctx = ctx.clone();
                    move |path, body| submit_typed_job(ctx, path, body)
                }),
            )
            .route(
                "/jobs/:key/results",
                get({
                    let ctx = ctx.clone();
                    move |path| get_job_results(ctx, path)
                }),
            )
            .route(
                "/status",
                get({
                    let ctx = ctx.clone();
                    move || get_status(ctx)
                }),
            )
            .route("/metrics", get(move || get_metrics(metrics_registry)));
        let router = Self::add_common_layers(router);
        Self { router }
    }

    pub async fn run(self, port: u16, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
        info!("Listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router)
            .with_graceful_shutdown(cancellation_token.cancelled_owned())
            .await?;
        Ok(())
    }

    fn add_common_layers(router: axum::Router) -> axum::Router {
        router
            .layer(sentry_tower::NewSentryLayer::new_from_top())
            .layer(sentry_tower::SentryHttpLayer::with_transaction())
            .layer(tower_http::catch_panic::CatchPanicLayer::new())
    }

    pub fn into_router(self) -> axum::Router {
        self.router
    }
}
