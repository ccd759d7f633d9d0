//! Order command implementation.

use serde::Serialize;
use tidesync_engine::ModelRegistry;

/// Creation and deletion order of a schema.
#[derive(Debug, Serialize)]
pub struct OrderResult {
    /// Parents first.
    pub creation: Vec<String>,
    /// Children first.
    pub deletion: Vec<String>,
    /// Edges dropped to break cycles, as `(model, target)`.
    pub excluded: Vec<(String, String)>,
}

/// Runs the order command.
pub fn run(registry: &ModelRegistry, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", render(registry, format)?);
    Ok(())
}

/// Renders the order of `registry` as text or JSON.
pub fn render(registry: &ModelRegistry, format: &str) -> Result<String, serde_json::Error> {
    let graph = registry.graph();
    let result = OrderResult {
        creation: graph.creation_order().to_vec(),
        deletion: graph.deletion_order(),
        excluded: graph.excluded_edges().to_vec(),
    };

    if format == "json" {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&result)?));
    }

    let mut out = String::from("Creation order:\n");
    for (i, name) in result.creation.iter().enumerate() {
        let role = registry
            .model(name)
            .map(|m| format!("{:?}", m.sync_role()))
            .unwrap_or_default();
        out.push_str(&format!("  {:>3}. {name} ({role})\n", i + 1));
    }
    out.push_str("Deletion order:\n");
    out.push_str(&format!("  {}\n", result.deletion.join(", ")));
    for (model, target) in &result.excluded {
        out.push_str(&format!("Excluded cycle edge: {model} -> {target}\n"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::schema::{load, tests::schema_file, tests::CLINIC};

    #[test]
    fn text_lists_parents_first() {
        let file = schema_file(CLINIC);
        let registry = load(file.path()).unwrap();
        let out = render(&registry, "text").unwrap();

        let program = out.find("Program (PullOnly)").unwrap();
        let survey = out.find("Survey (PullOnly)").unwrap();
        assert!(program < survey);
        assert!(out.contains("Deletion order:"));
    }

    #[test]
    fn json_has_both_orders() {
        let file = schema_file(CLINIC);
        let registry = load(file.path()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&render(&registry, "json").unwrap()).unwrap();

        let creation = value["creation"].as_array().unwrap();
        let deletion = value["deletion"].as_array().unwrap();
        assert_eq!(creation.len(), 4);
        assert_eq!(creation.first(), deletion.last());
        assert!(value["excluded"].as_array().unwrap().is_empty());
    }
}
