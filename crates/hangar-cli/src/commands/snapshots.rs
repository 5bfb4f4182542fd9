use super::{json_pretty, Context, EXIT_SUCCESS};
use hangar_core::EventBus;
use hangar_schema::{SnapshotId, WorkspaceId};
use hangar_store::SnapshotStore;
use std::sync::Arc;

pub fn run(ctx: &Context, workspace: &str) -> Result<u8, String> {
    let store = ctx.snapshot_store()?;
    let snapshots = store
        .list_snapshots(&WorkspaceId::new(workspace))
        .map_err(|e| format!("store error: {e}"))?;

    if ctx.json {
        let payload = serde_json::json!({
            "workspace": workspace,
            "snapshots": snapshots,
        });
        println!("{}", json_pretty(&payload)?);
    } else if snapshots.is_empty() {
        println!("no snapshots for workspace {workspace}");
    } else {
        println!("snapshots for workspace {workspace}:");
        for s in &snapshots {
            println!(
                "  {} {}/{} ({}) {}",
                s.id, s.env_name, s.machine_name, s.source, s.created_at
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn remove(ctx: &Context, id: &str) -> Result<u8, String> {
    let engine = ctx.engine(Arc::new(EventBus::new()))?;
    engine
        .delete_snapshot(&SnapshotId::new(id))
        .map_err(|e| e.to_string())?;
    if !ctx.json {
        println!("removed snapshot {id}");
    }
    Ok(EXIT_SUCCESS)
}
