//! Tool dispatch
//!
//! Maps a request's tool name onto the cache service and shapes the answer.
//! Failures are reported in the response, never as a dropped connection.

use crate::error::{DaemonError, Result};
use crate::protocol::{Request, Response};
use crate::server::ServerState;
use crate::types::{HealthReport, HealthStatus, ServerHealth, StatsReport, StorageHealth};
use file_content_cache::{parse_duration, Outcome};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

const SLOW_RESPONSE_SECS: f64 = 0.1;
const HIGH_UTILIZATION: f64 = 0.8;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WarmParams {
    patterns: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileParams {
    file_path: Option<String>,
    include_content: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClearParams {
    confirm: bool,
    older_than: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PathParams {
    file_path: Option<String>,
}

/// Run one request and time it
pub async fn dispatch(state: &ServerState, request: Request) -> Response {
    let started = Instant::now();
    let params = &request.params;

    let result = match request.tool.as_str() {
        "cache_warm" => cache_warm(state, params).await,
        "cache_file" => cache_file(state, params).await,
        "cache_stats" => cache_stats(state).await,
        "cache_clear" => cache_clear(state, params).await,
        "cache_health" => Ok(cache_health(state).await),
        "cache_invalidate" => cache_invalidate(state, params).await,
        "cache_cleanup" => cache_cleanup(state).await,
        other => Ok(Response::failure(format!("Unknown tool: {}", other))),
    };

    let mut response = result.unwrap_or_else(|e| {
        warn!(tool = %request.tool, error = %e, "Tool failed");
        Response::failure(e.to_string())
    });
    response.execution_time = started.elapsed().as_secs_f64();
    response
}

fn parse_params<T>(params: &Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| DaemonError::Protocol(format!("invalid params: {}", e)))
}

fn required_path(file_path: Option<String>) -> Option<PathBuf> {
    file_path.filter(|p| !p.is_empty()).map(PathBuf::from)
}

async fn cache_warm(state: &ServerState, params: &Value) -> Result<Response> {
    let WarmParams { patterns } = parse_params(params)?;
    if patterns.is_empty() {
        return Ok(Response::failure("No patterns provided"));
    }

    let report = state.cache.warm(&patterns).await?;
    Ok(Response::ok(json!({
        "files_processed": report.processed,
        "files_cached": report.cached,
        "skipped_fresh": report.skipped_fresh,
        "errors": report.errors,
        "elapsed": report.elapsed.as_secs_f64(),
    })))
}

async fn cache_file(state: &ServerState, params: &Value) -> Result<Response> {
    let FileParams {
        file_path,
        include_content,
    } = parse_params(params)?;
    let Some(path) = required_path(file_path) else {
        return Ok(Response::failure("No file_path provided"));
    };

    let Some(fetched) = state.cache.get(&path).await? else {
        return Ok(Response::failure(format!(
            "File not found: {}",
            path.display()
        )));
    };

    let cached = matches!(fetched.outcome, Outcome::Hit(_) | Outcome::Miss);
    let mut data = json!({
        "file_path": path.to_string_lossy(),
        "cached": cached,
        "outcome": fetched.outcome,
        "size": fetched.content.len(),
    });
    if include_content {
        data["content"] = Value::String(String::from_utf8_lossy(&fetched.content).into_owned());
    }

    Ok(Response::ok(data).with_cache_hit(fetched.outcome.is_hit()))
}

async fn cache_stats(state: &ServerState) -> Result<Response> {
    let report = StatsReport {
        server: state.stats(),
        cache: state.cache.stats().await?,
        compression: state.cache.compression_stats().await?,
        memory: state.cache.memory_stats(),
    };
    Ok(Response::ok(serde_json::to_value(report)?))
}

async fn cache_clear(state: &ServerState, params: &Value) -> Result<Response> {
    let ClearParams {
        confirm,
        older_than,
    } = parse_params(params)?;
    if !confirm {
        return Ok(Response::failure("Cache clear requires confirmation"));
    }

    let older_than = match older_than.as_deref().filter(|s| !s.is_empty()) {
        Some(spec) => match parse_duration(spec) {
            Ok(age) => Some(age),
            Err(e) => return Ok(Response::failure(format!("Invalid older_than: {}", e))),
        },
        None => None,
    };

    let report = state.cache.clear(older_than).await?;
    info!(
        records_removed = report.records_removed,
        blobs_removed = report.blobs_removed,
        "Cache cleared"
    );
    Ok(Response::ok(json!({
        "message": "Cache cleared successfully",
        "records_removed": report.records_removed,
        "blobs_removed": report.blobs_removed,
    })))
}

async fn cache_health(state: &ServerState) -> Response {
    let server = state.stats();
    let connection_utilization =
        server.active_connections as f64 / server.max_connections.max(1) as f64;

    let database_accessible = match state.cache.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Index did not answer health check");
            false
        }
    };
    let cache_directory_exists = tokio::fs::try_exists(&state.cache.config().cache_dir)
        .await
        .unwrap_or(false);
    let memory = state.cache.memory_stats();

    let mut recommendations = Vec::new();
    if server.avg_response_time > SLOW_RESPONSE_SECS {
        recommendations.push("Consider reducing cache size or optimizing queries".to_string());
    }
    if connection_utilization > HIGH_UTILIZATION {
        recommendations
            .push("High connection utilization - consider increasing max_connections".to_string());
    }
    if !database_accessible || !cache_directory_exists {
        recommendations.push("Check cache system configuration".to_string());
        recommendations.push("Verify database accessibility".to_string());
    }
    if memory.over_limit {
        recommendations
            .push("Memory ceiling exceeded - consider lowering memoryCache.maxItems".to_string());
    }

    let status = if recommendations.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    let report = HealthReport {
        status,
        server: ServerHealth {
            active_connections: server.active_connections,
            connection_utilization,
            avg_response_time: server.avg_response_time,
            uptime_secs: server.uptime_secs,
        },
        cache: StorageHealth {
            database_accessible,
            cache_directory_exists,
        },
        memory,
        recommendations,
    };

    match serde_json::to_value(report) {
        Ok(data) => Response::ok(data),
        Err(e) => Response::failure(e.to_string()),
    }
}

async fn cache_invalidate(state: &ServerState, params: &Value) -> Result<Response> {
    let PathParams { file_path } = parse_params(params)?;
    let Some(path) = required_path(file_path) else {
        return Ok(Response::failure("No file_path provided"));
    };

    let removed = state.cache.invalidate(&path).await?;
    Ok(Response::ok(json!({
        "file_path": path.to_string_lossy(),
        "removed": removed,
    })))
}

async fn cache_cleanup(state: &ServerState) -> Result<Response> {
    let report = state.cache.cleanup().await?;
    Ok(Response::ok(serde_json::to_value(report)?))
}
