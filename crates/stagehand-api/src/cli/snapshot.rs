//! `stagehand snapshot` - summarize the persisted registry snapshot.

use std::collections::BTreeMap;

use anyhow::Result;
use console::style;

use stagehand_core::workflow::RegistrySnapshot;

use crate::state::AppState;

/// Count records in a snapshot by their `status` field.
fn status_counts(snapshot: &RegistrySnapshot) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in snapshot.active_workflows.values() {
        let status = record
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
            .to_string();
        *counts.entry(status).or_insert(0) += 1;
    }
    counts
}

pub async fn show_snapshot(state: &AppState, json: bool) -> Result<()> {
    let Some(store) = state.snapshot_store() else {
        if json {
            println!("{}", serde_json::json!({ "enabled": false }));
        } else {
            println!("  Snapshot persistence is disabled.");
        }
        return Ok(());
    };

    let Some(snapshot) = store.read().await? else {
        if json {
            println!(
                "{}",
                serde_json::json!({ "enabled": true, "path": store.path().display().to_string(), "exists": false })
            );
        } else {
            println!("  No snapshot at {}", style(store.path().display()).dim());
        }
        return Ok(());
    };

    let counts = status_counts(&snapshot);

    if json {
        let summary = serde_json::json!({
            "enabled": true,
            "path": store.path().display().to_string(),
            "exists": true,
            "timestamp": snapshot.timestamp,
            "records": snapshot.active_workflows.len(),
            "results": snapshot.completed_workflows.len(),
            "max_completed_retention": snapshot.max_completed_retention,
            "by_status": counts,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Snapshot {}",
        style("◆").bold(),
        style(store.path().display()).cyan()
    );
    println!("  Written:   {}", snapshot.timestamp.to_rfc3339());
    println!();
    println!("  {}", style("── Workflows ──").dim());
    println!("  Records:   {}", style(snapshot.active_workflows.len()).bold());
    for (status, count) in &counts {
        println!("    {status:<10} {count}");
    }
    println!(
        "  Results:   {} (retention {})",
        style(snapshot.completed_workflows.len()).bold(),
        snapshot.max_completed_retention
    );
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::workflow::WorkflowRegistry;
    use stagehand_types::workflow::WorkflowStatus;

    #[tokio::test]
    async fn test_status_counts_groups_records() {
        let registry = WorkflowRegistry::with_limits(5, 5);
        for id in ["a", "b", "c"] {
            registry
                .create(id, "debate", "x", serde_json::Value::Null)
                .await
                .unwrap();
        }
        registry.transition("a", WorkflowStatus::Running, None).await;
        registry.transition("b", WorkflowStatus::Running, None).await;

        let counts = status_counts(&registry.snapshot().await);
        assert_eq!(counts.get("running"), Some(&2));
        assert_eq!(counts.get("pending"), Some(&1));
    }
}
