//! Process-wide registry of named tables and views.
//!
//! `delete` closes the store and clears the listener registries under the
//! registry lock, so no lookup can hand out a half-closed table.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use gridpulse_common::GridError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::info;

use crate::table::Table;
use crate::view::TableView;

struct Directory {
    tables: RwLock<HashMap<String, Table>>,
    views: RwLock<HashMap<String, TableView>>,
}

static DIRECTORY: Lazy<Directory> = Lazy::new(|| Directory {
    tables: RwLock::new(HashMap::new()),
    views: RwLock::new(HashMap::new()),
});

/// Looks up a registered table.
pub fn get(name: &str) -> Result<Table, GridError> {
    DIRECTORY
        .tables
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| GridError::UnknownTable {
            name: name.to_string(),
        })
}

/// Returns the registered table, registering the factory's result if the
/// name is unknown. The factory runs outside the registry lock — it may
/// itself register tables (e.g. via [`Table::new`]) — so under a
/// concurrent race its result can be discarded in favor of whichever
/// registration landed first.
pub fn get_or_init<F>(name: &str, factory: F) -> Table
where
    F: FnOnce() -> Table,
{
    if let Some(table) = DIRECTORY.tables.read().get(name) {
        return table.clone();
    }
    let fresh = factory();
    match DIRECTORY.tables.write().entry(name.to_string()) {
        Entry::Occupied(occupied) => occupied.get().clone(),
        Entry::Vacant(vacant) => {
            info!(name, "table registered");
            vacant.insert(fresh).clone()
        }
    }
}

/// Registers `table` under `name`, replacing any previous registration.
/// The previous table (if any) stays usable through existing handles.
pub fn set(name: &str, table: Table) {
    DIRECTORY.tables.write().insert(name.to_string(), table);
    info!(name, "table registered");
}

/// Registered table names, sorted.
pub fn names() -> Vec<String> {
    let mut names: Vec<String> = DIRECTORY.tables.read().keys().cloned().collect();
    names.sort();
    names
}

/// Unregisters and closes a table: its store refuses further mutation and
/// every listener registration is dropped. Existing handles keep reading
/// the frozen snapshot.
pub fn delete(name: &str) -> Result<(), GridError> {
    let mut tables = DIRECTORY.tables.write();
    let table = tables.remove(name).ok_or_else(|| GridError::UnknownTable {
        name: name.to_string(),
    })?;
    table.close();
    info!(name, "table deleted");
    Ok(())
}

/// Looks up a registered view.
pub fn get_view(name: &str) -> Result<TableView, GridError> {
    DIRECTORY
        .views
        .read()
        .get(name)
        .cloned()
        .ok_or_else(|| GridError::UnknownTable {
            name: name.to_string(),
        })
}

/// Registers `view` under `name`, replacing any previous registration.
pub fn set_view(name: &str, view: TableView) {
    DIRECTORY.views.write().insert(name.to_string(), view);
    info!(name, "view registered");
}

/// Registered view names, sorted.
pub fn view_names() -> Vec<String> {
    let mut names: Vec<String> = DIRECTORY.views.read().keys().cloned().collect();
    names.sort();
    names
}

/// Unregisters and closes a view.
pub fn delete_view(name: &str) -> Result<(), GridError> {
    let mut views = DIRECTORY.views.write();
    let view = views.remove(name).ok_or_else(|| GridError::UnknownTable {
        name: name.to_string(),
    })?;
    view.close();
    info!(name, "view deleted");
    Ok(())
}
