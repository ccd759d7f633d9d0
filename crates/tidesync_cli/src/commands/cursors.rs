//! Cursors command implementation.

use serde::Serialize;
use std::path::Path;
use tidesync_engine::{list_cursors, pending_deletions, ModelRegistry, SyncCursor, MARKED_FOR_PUSH};
use tidesync_store::{Query, Store};

/// Sync progress of a node's store.
#[derive(Debug, Serialize)]
pub struct CursorsResult {
    /// Store log path.
    pub path: String,
    /// Cursor of every channel synced at least once.
    pub cursors: Vec<SyncCursor>,
    /// Channels with queued tombstones.
    pub pending_deletions: Vec<ChannelCount>,
    /// Roots waiting to be pushed.
    pub dirty_roots: Vec<ChannelCount>,
}

/// A count attached to a channel or model.
#[derive(Debug, Serialize)]
pub struct ChannelCount {
    /// Channel or model name.
    pub name: String,
    /// Count.
    pub count: usize,
}

/// Runs the cursors command.
pub fn run(
    path: &Path,
    registry: &ModelRegistry,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    let store = Store::open(path, registry.table_schemas())?;
    let result = inspect(&store, registry, path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print!("{}", render_text(&result)),
    }
    Ok(())
}

/// Collects cursors, queued deletions and dirty roots.
pub fn inspect(
    store: &Store,
    registry: &ModelRegistry,
    path: &Path,
) -> Result<CursorsResult, Box<dyn std::error::Error>> {
    let cursors = list_cursors(store)?;

    let mut pending = Vec::new();
    let mut dirty = Vec::new();
    for model in registry.channel_models() {
        let Some(channel) = model.channel() else {
            continue;
        };
        let queued = pending_deletions(store, channel)?.len();
        if queued > 0 {
            pending.push(ChannelCount {
                name: channel.to_string(),
                count: queued,
            });
        }
        if model.sync_role().is_root() {
            let count = store
                .find_all(model.name(), &Query::all().where_eq(MARKED_FOR_PUSH, true))?
                .len();
            dirty.push(ChannelCount {
                name: model.name().to_string(),
                count,
            });
        }
    }

    Ok(CursorsResult {
        path: path.display().to_string(),
        cursors,
        pending_deletions: pending,
        dirty_roots: dirty,
    })
}

fn render_text(result: &CursorsResult) -> String {
    let mut out = format!("Store: {}\n", result.path);
    out.push_str("Cursors:\n");
    if result.cursors.is_empty() {
        out.push_str("  (never synced)\n");
    }
    for cursor in &result.cursors {
        out.push_str(&format!(
            "  {:<24} last_synced={:<12} last_pushed={}\n",
            cursor.channel, cursor.last_synced, cursor.last_pushed
        ));
    }
    if !result.pending_deletions.is_empty() {
        out.push_str("Pending deletions:\n");
        for entry in &result.pending_deletions {
            out.push_str(&format!("  {:<24} {}\n", entry.name, entry.count));
        }
    }
    out.push_str("Dirty roots:\n");
    for entry in &result.dirty_roots {
        out.push_str(&format!("  {:<24} {}\n", entry.name, entry.count));
    }
    out
}
