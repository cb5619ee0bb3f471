//! Validating, caching tool executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use vox_domain::error::Error;
use vox_domain::tool::{ToolCall, ToolResult};

use crate::cache::{cache_key, ResultCache};
use crate::registry::{Tool, ToolRegistry};

/// Execution statistics, exposed through the health report.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    pub executions: AtomicU64,
    pub cache_hits: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
}

impl ExecutorStats {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "executions": self.executions.load(Ordering::Relaxed),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "failures": self.failures.load(Ordering::Relaxed),
            "timeouts": self.timeouts.load(Ordering::Relaxed),
        })
    }
}

/// Executes tool calls against a [`ToolRegistry`].
///
/// Every failure mode is folded into a failed [`ToolResult`]; `execute`
/// itself never errors, so one bad call cannot poison a batch.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    cache: ResultCache,
    default_timeout: Duration,
    stats: ExecutorStats,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache_capacity: usize,
        cache_ttl: Duration,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache: ResultCache::new(cache_capacity, cache_ttl),
            default_timeout,
            stats: ExecutorStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    /// Execute a single tool call.
    ///
    /// On a cache hit the stored payload is returned with the fresh
    /// call id substituted in.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.stats.executions.fetch_add(1, Ordering::Relaxed);

        let tool = match self.registry.get(&call.tool_name) {
            Some(t) => t,
            None => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return ToolResult::failed(
                    &call.call_id,
                    format!("unknown tool: {}", call.tool_name),
                );
            }
        };

        let args = match validate_arguments(tool.as_ref(), &call.arguments) {
            Ok(args) => args,
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                return ToolResult::failed(&call.call_id, e.to_string());
            }
        };

        // Cache lookup keys on the post-default canonical arguments so
        // explicit defaults and omitted ones land on the same entry.
        let key = cache_key(&call.tool_name, &Value::Object(args.clone()));
        if let Some(payload) = self.cache.get(&key) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(tool = %call.tool_name, "tool cache hit");
            return ToolResult::ok(&call.call_id, payload);
        }

        let timeout = tool.timeout().unwrap_or(self.default_timeout);

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(timeout, tool.execute(&args)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(payload)) => {
                tracing::debug!(tool = %call.tool_name, elapsed_ms, "tool executed");
                self.cache.put(key, payload.clone());
                ToolResult::ok(&call.call_id, payload)
            }
            Ok(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(tool = %call.tool_name, error = %e, "tool failed");
                ToolResult::failed(&call.call_id, e.to_string())
            }
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(tool = %call.tool_name, ?timeout, "tool timed out");
                ToolResult::failed(&call.call_id, "timeout")
            }
        }
    }

    /// Execute a batch concurrently; results come back in input order.
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let futures: Vec<_> = calls.iter().map(|call| self.execute(call)).collect();
        futures_util::future::join_all(futures).await
    }
}

/// Check a call's arguments against the tool's declared parameters and
/// fill in defaults. Unknown arguments pass through untouched.
fn validate_arguments(
    tool: &dyn Tool,
    arguments: &Value,
) -> Result<serde_json::Map<String, Value>, Error> {
    let mut args = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(Error::Validation(format!(
                "tool arguments must be an object, got {other}"
            )))
        }
    };

    for param in tool.parameters() {
        match args.get(&param.name) {
            Some(value) => {
                if !param.kind.matches(value) {
                    return Err(Error::Validation(format!(
                        "argument {:?} expects {}, got {value}",
                        param.name,
                        param.kind.as_str()
                    )));
                }
                if let Some(allowed) = &param.enum_values {
                    if !allowed.contains(value) {
                        return Err(Error::Validation(format!(
                            "argument {:?} must be one of {allowed:?}",
                            param.name
                        )));
                    }
                }
            }
            None if param.required => {
                return Err(Error::Validation(format!(
                    "missing required argument {:?}",
                    param.name
                )));
            }
            None => {
                if let Some(default) = &param.default {
                    args.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    Ok(args)
}
