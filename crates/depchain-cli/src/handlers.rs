//! Command handlers.

use crate::client::ApiClient;
use crate::commands::{ResultArg, SchemaKind};
use crate::config::{CliConfig, DaemonConfig, OutputFormat};
use console::style;
use depchain_core::buildset::BuildResult;
use depchain_core::pending::BuildRequest;
use depchain_core::properties::PropertyMap;
use depchain_core::sourcestamp::NewSourceStamp;
use depchain_scheduler::{SchedulerConfig, SchedulerGraph};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Print `value` as JSON or YAML; returns false for table output.
fn print_structured<T: Serialize>(config: &CliConfig, value: &T) -> Result<bool, Box<dyn std::error::Error>> {
    match config.output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Table => return Ok(false),
    }
    Ok(true)
}

/// Validate a scheduler configuration.
pub fn validate(path: &Path) -> CliResult {
    let config = SchedulerConfig::from_file(path)?;
    let graph = SchedulerGraph::build(&config)?;
    let order = graph.topological_order()?;

    println!(
        "{} {} is valid",
        style("✓").green(),
        style(path.display()).bold()
    );
    println!("  Schedulers: {}", graph.len());
    for spec in &config.schedulers {
        if spec.upstream().is_empty() {
            println!("    - {} ({})", spec.name(), spec.kind());
        } else {
            println!(
                "    - {} ({}) <- {}",
                spec.name(),
                spec.kind(),
                spec.upstream().join(", ")
            );
        }
    }
    println!(
        "  Construction order: {}",
        order
            .iter()
            .map(|node| node.name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    Ok(())
}

pub fn schema(kind: SchemaKind) -> CliResult {
    let schema = match kind {
        SchemaKind::Schedulers => schemars::schema_for!(SchedulerConfig),
        SchemaKind::Daemon => schemars::schema_for!(DaemonConfig),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

pub async fn list_schedulers(config: &CliConfig) -> CliResult {
    let list = ApiClient::new(config).list_schedulers().await?;
    if print_structured(config, &list)? {
        return Ok(());
    }

    println!("{:<24} {:<12} {:<10} UPSTREAM", "NAME", "KIND", "STATE");
    for scheduler in &list.schedulers {
        println!(
            "{:<24} {:<12} {:<10} {}",
            scheduler.name,
            scheduler.kind,
            scheduler.state.as_deref().unwrap_or("-"),
            scheduler.upstream.join(", ")
        );
    }
    Ok(())
}

/// Parse `NAME=VALUE` pairs; values that are not valid JSON are kept as strings.
pub fn parse_properties(raw: &[String]) -> Result<PropertyMap, String> {
    let mut properties = PropertyMap::new();
    for pair in raw {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid property {:?}: expected NAME=VALUE", pair))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        properties.insert(name.to_string(), value);
    }
    Ok(properties)
}

pub async fn request(
    config: &CliConfig,
    scheduler: &str,
    ssid: &str,
    reason: String,
    external_id: Option<String>,
    properties: &[String],
) -> CliResult {
    let request = BuildRequest {
        reason,
        external_id,
        properties: parse_properties(properties)?,
    };

    let outcome = ApiClient::new(config)
        .request_build(scheduler, ssid, &request)
        .await?;
    if print_structured(config, &outcome)? {
        return Ok(());
    }

    match outcome.outcome.as_str() {
        "admitted" => {
            println!("{} Admitted", style("✓").green());
            for buildset in &outcome.buildsets {
                println!("  buildset {} ({})", buildset.id, buildset.builder);
            }
        }
        "waiting" => println!(
            "{} Waiting on {}",
            style("…").yellow(),
            outcome.unmet.join(", ")
        ),
        "triggered" => println!("{} Forwarded to targets of {}", style("▶").cyan(), scheduler),
        other => println!("{} {}", style("i").blue(), other),
    }
    Ok(())
}

pub async fn pending(config: &CliConfig, scheduler: &str, ssid: Option<&str>) -> CliResult {
    let list = ApiClient::new(config).pending(scheduler, ssid).await?;
    if print_structured(config, &list)? {
        return Ok(());
    }

    if list.pending.is_empty() {
        println!("{} No pending requests for {}", style("i").blue(), scheduler);
        return Ok(());
    }

    println!("{:<8} {:<8} {:<25} REASON", "ID", "SSID", "CREATED");
    for request in &list.pending {
        println!(
            "{:<8} {:<8} {:<25} {}",
            request.id,
            request.source_stamp_id,
            request.created_at.format("%Y-%m-%d %H:%M:%S"),
            request.reason
        );
    }
    Ok(())
}

pub async fn cancel(config: &CliConfig, scheduler: &str, ssid: &str) -> CliResult {
    let cancelled = ApiClient::new(config).cancel(scheduler, ssid).await?;
    println!(
        "{} Cancelled {} pending request(s)",
        style("✓").green(),
        cancelled
    );
    Ok(())
}

impl From<ResultArg> for BuildResult {
    fn from(arg: ResultArg) -> Self {
        match arg {
            ResultArg::Success => BuildResult::Success,
            ResultArg::Warnings => BuildResult::Warnings,
            ResultArg::Failure => BuildResult::Failure,
            ResultArg::Skipped => BuildResult::Skipped,
            ResultArg::Exception => BuildResult::Exception,
            ResultArg::Retry => BuildResult::Retry,
            ResultArg::Cancelled => BuildResult::Cancelled,
        }
    }
}

pub async fn complete(config: &CliConfig, buildset_id: &str, result: ResultArg) -> CliResult {
    let buildset = ApiClient::new(config)
        .complete(buildset_id, result.into())
        .await?;
    if print_structured(config, &buildset)? {
        return Ok(());
    }

    println!(
        "{} Buildset {} completed: {}",
        style("✓").green(),
        buildset.id,
        buildset.result.map(|r| r.as_str()).unwrap_or("-")
    );
    Ok(())
}

pub async fn commit(
    config: &CliConfig,
    revision: String,
    branch: String,
    repository: Option<String>,
) -> CliResult {
    let stamp = NewSourceStamp {
        repository,
        ..NewSourceStamp::new(branch, revision)
    };

    let outcome = ApiClient::new(config).commit(&stamp).await?;
    if print_structured(config, &outcome)? {
        return Ok(());
    }

    println!(
        "{} Source stamp {} recorded",
        style("✓").green(),
        outcome.source_stamp.id
    );
    for name in &outcome.triggered {
        println!("  triggered {}", name);
    }
    for (name, error) in &outcome.errors {
        println!("  {} {}: {}", style("✗").red(), name, error);
    }
    Ok(())
}

pub async fn expire(config: &CliConfig, older_than: u64) -> CliResult {
    let expired = ApiClient::new(config).expire(older_than).await?;
    println!("{} Expired {} pending request(s)", style("✓").green(), expired);
    Ok(())
}

pub async fn reconcile(config: &CliConfig) -> CliResult {
    let summary = ApiClient::new(config).reconcile().await?;
    if print_structured(config, &summary)? {
        return Ok(());
    }

    println!(
        "{} Examined {}: {} admitted, {} waiting, {} failed, {} expired",
        style("✓").green(),
        summary.examined,
        summary.admitted,
        summary.waiting,
        summary.failed,
        summary.expired
    );
    Ok(())
}

/// Show current configuration.
pub fn show_config(config: &CliConfig) -> CliResult {
    println!("API URL: {}", config.api_url);
    println!("Output format: {:?}", config.output_format);
    println!("Config file: {}", CliConfig::config_path()?.display());
    Ok(())
}

/// Set a configuration value.
pub fn set_config(key: &str, value: &str) -> CliResult {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

/// Load daemon configuration, loading `.env` first.
pub fn daemon_config(path: &Path, memory: bool, listen: Option<String>) -> Result<DaemonConfig, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let mut config = DaemonConfig::load(path)?;
    config.memory |= memory;
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_properties() {
        let properties = parse_properties(&[
            "got_revision=abc123".to_string(),
            "retries=3".to_string(),
            "tags=[\"a\",\"b\"]".to_string(),
            "empty=".to_string(),
        ])
        .unwrap();

        assert_eq!(properties["got_revision"], json!("abc123"));
        assert_eq!(properties["retries"], json!(3));
        assert_eq!(properties["tags"], json!(["a", "b"]));
        assert_eq!(properties["empty"], json!(""));
    }

    #[test]
    fn test_parse_properties_rejects_missing_value() {
        assert!(parse_properties(&["no-equals".to_string()]).is_err());
    }
}
