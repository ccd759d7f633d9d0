//! Plan command implementation.

use tidesync_engine::{create_export_plan, create_import_plan, ModelRegistry, SyncRole};

/// Runs the plan command.
pub fn run(
    registry: &ModelRegistry,
    model: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", render(registry, model, format)?);
    Ok(())
}

/// Renders the plan of one model, or of every model with a channel.
pub fn render(
    registry: &ModelRegistry,
    model: Option<&str>,
    format: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let names: Vec<String> = match model {
        Some(model) => vec![model.to_string()],
        None => registry
            .channel_models()
            .map(|m| m.name().to_string())
            .collect(),
    };

    let mut plans = Vec::with_capacity(names.len());
    for name in &names {
        let plan = if registry.get(name)?.sync_role() == SyncRole::Root {
            create_export_plan(registry, name)?
        } else {
            create_import_plan(registry, name)?
        };
        plans.push(plan);
    }

    if format == "json" {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&plans)?));
    }
    Ok(plans.iter().map(|plan| plan.to_string()).collect())
}
