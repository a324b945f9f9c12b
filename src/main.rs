use dotenv::dotenv;
use fpl_resilience::config::{API_CALLS_POLICY, CRITICAL_OPERATIONS_POLICY};
use fpl_resilience::{init_logging, CacheTtl, ResilienceConfig, ResilienceError, ResilientClient};
use futures::future::join_all;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Stand-in for the HTTP call: the first two requests drop the connection.
async fn fetch_bootstrap(calls: Arc<AtomicUsize>) -> fpl_resilience::Result<Vec<String>> {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(Duration::from_millis(50)).await;

    if n <= 2 {
        return Err(ResilienceError::Connectivity(format!(
            "connection reset on request {}",
            n
        )));
    }
    Ok(vec!["Arsenal".to_string(), "Liverpool".to_string()])
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_logging();

    let config = match ResilienceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let client = match ResilientClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to build resilient client");
            return ExitCode::FAILURE;
        }
    };
    info!("Resilient client initialized");

    let calls = Arc::new(AtomicUsize::new(0));
    let requests = (0..4).map(|i| {
        let client = client.clone();
        let calls = Arc::clone(&calls);
        async move {
            let policy = if i == 0 {
                CRITICAL_OPERATIONS_POLICY
            } else {
                API_CALLS_POLICY
            };
            client
                .fetch("bootstrap", CacheTtl::Long, "fpl_api", policy, || {
                    fetch_bootstrap(Arc::clone(&calls))
                })
                .await
        }
    });

    for (i, result) in join_all(requests).await.into_iter().enumerate() {
        match result {
            Ok(teams) => info!(request = i, teams = teams.len(), "Fetched bootstrap data"),
            Err(e) => warn!(request = i, error = %e, "{}", e.user_message()),
        }
    }

    // Served from the cache
    if let Some(teams) = client.cache().get::<Vec<String>>("bootstrap") {
        info!(teams = ?teams, "Cached bootstrap data");
    }

    info!(
        remote_calls = calls.load(Ordering::SeqCst),
        hit_rate = client.cache_stats().hit_rate(),
        "Demo finished"
    );

    match serde_json::to_string_pretty(&client.health()) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!(error = %e, "Failed to render health snapshot");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
