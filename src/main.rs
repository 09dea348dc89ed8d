use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use beamline_worker::ingress::{ExecAssignment, ResultPublisher, StdoutSink};
use beamline_worker::observability::endpoints;
use beamline_worker::observability::{Correlation, Observability};
use beamline_worker::{FeatureFlags, WorkerConfig, WorkerRuntime};

fn load_config() -> WorkerConfig {
    let Some(path) = std::env::args().nth(1) else {
        return WorkerConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            eprintln!("Invalid config file {path}: {e}");
            std::process::exit(1);
        }),
        Err(e) => {
            eprintln!("Failed to read config file {path}: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config();
    let flags = FeatureFlags::from_env();
    let obs = Arc::new(Observability::new(
        format!("worker-{}", std::process::id()),
        &flags,
    ));

    let health_addr = format!("0.0.0.0:{}", config.health_port);
    let (bound, _health) = endpoints::serve(endpoints::health_router(), &health_addr)
        .await
        .expect("failed to bind health endpoint");
    obs.logger.info(
        "Health endpoint started",
        &Correlation::default(),
        json!({ "address": bound.to_string() }),
    );

    if flags.observability_metrics {
        let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
        let (bound, _metrics) = endpoints::serve(
            endpoints::metrics_router(obs.metrics.clone()),
            &metrics_addr,
        )
        .await
        .expect("failed to bind metrics endpoint");
        obs.logger.info(
            "Metrics endpoint started",
            &Correlation::default(),
            json!({ "address": bound.to_string() }),
        );
    }
    obs.metrics.set_health_status("worker", true);

    let bus_url = config.bus_url.clone();
    let runtime = WorkerRuntime::builder()
        .config(config)
        .flags(flags)
        .observability(obs.clone())
        .spawn()
        .await
        .expect("failed to start worker runtime");

    let publisher = Arc::new(ResultPublisher::new(Arc::new(StdoutSink)));

    obs.logger.info(
        "Worker ready, reading assignments from stdin",
        &Correlation::default(),
        json!({ "bus_url": bus_url }),
    );

    // One JSON assignment per line; results go back out the stdout sink.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let assignment = match ExecAssignment::from_json(&line) {
            Ok(assignment) => assignment,
            Err(e) => {
                obs.logger.error(
                    "Malformed assignment",
                    &Correlation::default(),
                    json!({ "error": e.to_string() }),
                );
                continue;
            }
        };

        let runtime = runtime.clone();
        let publisher = publisher.clone();
        let obs = obs.clone();
        tokio::spawn(async move {
            let step_id = assignment.step.context.step_id.clone();
            let result = runtime.execute(assignment.step.clone()).await;
            match assignment.exec_result(&result) {
                Ok(payload) => {
                    publisher.publish(&step_id, payload);
                }
                Err(e) => {
                    obs.logger.error(
                        "Result failed validation before publish",
                        &Correlation::from(&result.metadata),
                        json!({ "error": e.to_string() }),
                    );
                }
            }
        });
    }

    obs.logger
        .info("Worker shutting down", &Correlation::default(), json!({}));
}
