//! Config loading and executor selection for the CLI.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use orchestration::{
    Executor, HttpExecutor, HttpExecutorConfig, OrchestrationConfig, PlanExecutor,
};

/// Defaults, then the optional TOML file, then `ORCH_*` overrides.
pub fn load(path: Option<&Path>) -> Result<OrchestrationConfig> {
    let mut config = match path {
        Some(path) => OrchestrationConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => OrchestrationConfig::default(),
    };
    config.apply_env();
    config
        .validate()
        .context("configuration invalid after applying environment overrides")?;
    Ok(config)
}

/// HTTP executor when a URL is given (flag or `ORCH_EXECUTOR_URL`), else offline.
pub fn executor(url: Option<&str>) -> Result<Arc<dyn Executor>> {
    let mut http = HttpExecutorConfig::from_env();
    let url = url
        .map(str::to_string)
        .or_else(|| std::env::var("ORCH_EXECUTOR_URL").ok());
    match url {
        Some(url) => {
            http.endpoint = url;
            let executor = HttpExecutor::new(http).context("building HTTP executor")?;
            Ok(Arc::new(executor))
        }
        None => Ok(Arc::new(PlanExecutor::new())),
    }
}

/// Parse a `--context` argument; absent means an empty object.
pub fn parse_context(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("--context must be valid JSON"),
        None => Ok(serde_json::json!({})),
    }
}
