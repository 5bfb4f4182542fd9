use super::{json_pretty, load_descriptor, EXIT_SUCCESS};
use hangar_core::machine_start_order;
use std::path::Path;

pub fn run(descriptor_path: &Path, json: bool) -> Result<u8, String> {
    let descriptor = load_descriptor(descriptor_path)?;
    let order = machine_start_order(&descriptor.machines)
        .map_err(|e| format!("descriptor error: {e}"))?;

    if json {
        let entries: Vec<_> = order
            .iter()
            .map(|m| {
                serde_json::json!({
                    "name": m.name,
                    "type": m.machine_type,
                    "dev": m.dev,
                })
            })
            .collect();
        let payload = serde_json::json!({
            "environment": descriptor.name,
            "order": entries,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("start order of '{}':", descriptor.name);
        for (i, m) in order.iter().enumerate() {
            let marker = if m.dev { " (dev)" } else { "" };
            println!("  {}. {}{marker}", i + 1, m.name);
        }
    }
    Ok(EXIT_SUCCESS)
}
