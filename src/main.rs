// Sunspot jobs, an HTTP service and job workers for yearly sunspot records.
// Copyright (C) 2024 Subsquid Labs GmbH

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use prometheus_client::{metrics::info::Info, registry::Registry};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use sunspot_jobs::{
    cli::{Args, Mode},
    context::AppContext,
    http_server::Server as HttpServer,
    metrics, run_all,
    types::WorkType,
    worker::{handlers, WorkerRuntime},
};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn setup_tracing(args: &Args) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::builder().parse_lossy(
        std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV).unwrap_or("info".to_string()),
    );
    let fmt = tracing_subscriber::fmt::layer()
        .compact()
        .with_span_events(if args.log_span_durations {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .with_filter(env_filter);
    tracing_subscriber::registry()
        .with(fmt)
        .with(sentry::integrations::tracing::layer())
        .try_init()?;
    Ok(())
}

fn setup_sentry(args: &Args) -> Option<sentry::ClientInitGuard> {
    args.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                traces_sample_rate: args.sentry_traces_sample_rate,
                ..Default::default()
            },
        ))
    })
}

fn create_cancellation_token() -> Result<CancellationToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let copy = token.clone();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select!(
            _ = sigint.recv() => {
                copy.cancel();
            },
            _ = sigterm.recv() => {
                copy.cancel();
            },
        );
    });
    Ok(token)
}

async fn run_workers(
    ctx: &AppContext,
    args: &Args,
    work_types: &[(WorkType, usize)],
    cancellation_token: CancellationToken,
) -> Result<()> {
    let config = args.handler_config();
    let runtimes = work_types.iter().map(|&(work_type, replicas)| {
        let handler = handlers::for_work_type(work_type, &config);
        let runtime = Arc::new(WorkerRuntime::new(work_type, handler, ctx.clone()));
        runtime.run_replicas(replicas, cancellation_token.clone())
    });
    for result in futures::future::join_all(runtimes).await {
        result?;
    }
    Ok(())
}

async fn run(mut args: Args) -> anyhow::Result<()> {
    setup_tracing(&args)?;
    args.fill_defaults(); // tracing should be initialized at this point
    let _sentry_guard = setup_sentry(&args);

    let cancellation_token = create_cancellation_token()?;
    let retry = args.retry_policy();
    let store_config = args.store_config();
    let ctx = tokio::select! {
        ctx = AppContext::connect(&store_config, &retry) => ctx?,
        _ = cancellation_token.cancelled() => return Ok(()),
    };

    let info = Info::new(vec![(
        "version".to_owned(),
        env!("CARGO_PKG_VERSION").to_owned(),
    )]);
    let mut metrics_registry = Registry::default();
    metrics::register_metrics(&mut metrics_registry, info);

    match &args.mode {
        Mode::Api | Mode::All => {
            retry
                .run("dataset", || ctx.dataset.initialize(&args.seed_file))
                .await?;
        }
        Mode::Worker(_) => {}
    }

    match &args.mode {
        Mode::Api => {
            HttpServer::new(ctx, metrics_registry)
                .run(args.port, cancellation_token)
                .await?;
        }
        Mode::Worker(worker) => {
            run_workers(
                &ctx,
                &args,
                &[(worker.work_type, worker.replicas)],
                cancellation_token,
            )
            .await?;
        }
        Mode::All => {
            let work_types: Vec<_> = WorkType::ALL.iter().map(|&t| (t, 1)).collect();
            let (server_result, workers_result) = run_all!(
                cancellation_token,
                tokio::spawn(
                    HttpServer::new(ctx.clone(), metrics_registry)
                        .run(args.port, cancellation_token.child_token())
                ),
                run_workers(&ctx, &args, &work_types, cancellation_token.child_token()),
            );
            server_result??;
            workers_result?;
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}
