//! Reconciling the stored schema with the one a [`Config`] asks for.

use tracing::info;

use super::config::Config;
use super::error::{DatabaseError, DatabaseResult};
use super::snapshot::Snapshot;
use super::Database;
use crate::record::{Schema, TableSchema};
use crate::sync::{FIELD_CLOCK_TABLE, field_clock_schema};

fn has_user_tables(schema: &Schema) -> bool {
    schema.tables().iter().any(|t| !t.is_system())
}

/// Whether the file should be deleted and recreated before opening
pub(crate) fn needs_reset(stored: &Snapshot, config: &Config) -> bool {
    let Some(requested) = &config.schema else {
        return false;
    };
    config.delete_if_migration_needed
        && !config.read_only
        && has_user_tables(stored.schema())
        && !requested.matches(stored.schema())
}

/// Bring the stored schema in line with the configured one.
///
/// - a file without user tables gets the requested tables
/// - a matching schema with a newer requested version runs the migration
///   (if any) and stores the new version
/// - a differing schema needs a newer requested version and a migration;
///   tables the migration did not create are added afterwards and the result
///   must match the requested schema
pub(crate) fn reconcile(db: &Database) -> DatabaseResult<()> {
    let config = db.config();
    let stored = db.latest();
    let sync_table_missing =
        config.sync_node.is_some() && stored.schema().find_table(FIELD_CLOCK_TABLE).is_none();

    let Some(requested) = config.schema.clone() else {
        if sync_table_missing && !config.read_only {
            db.write(|txn| txn.add_table(field_clock_schema()))?;
        }
        return Ok(());
    };
    let stored_schema = stored.schema();
    let old_version = stored_schema.version();
    let new_version = requested.version();

    if !has_user_tables(stored_schema) {
        if config.read_only {
            return Err(DatabaseError::SchemaMismatch(
                "read-only database has no tables".to_string(),
            ));
        }
        db.write(|txn| {
            let mut tables: Vec<TableSchema> = requested.tables().to_vec();
            if sync_table_missing {
                tables.push(field_clock_schema());
            }
            txn.add_tables(tables)?;
            txn.set_schema_version(new_version);
            Ok(())
        })?;
        info!(schema_version = new_version, "created schema");
        return Ok(());
    }

    if new_version < old_version {
        return Err(DatabaseError::SchemaMismatch(format!(
            "stored schema version {} is newer than requested version {}",
            old_version, new_version
        )));
    }

    let matches = requested.matches(stored_schema);
    if matches && new_version == old_version {
        if sync_table_missing && !config.read_only {
            db.write(|txn| txn.add_table(field_clock_schema()))?;
        }
        return Ok(());
    }
    if !matches && (new_version == old_version || config.migration.is_none()) {
        return Err(DatabaseError::SchemaMismatch(format!(
            "migration required from version {} to {}: {}",
            old_version,
            new_version,
            requested.describe_differences(stored_schema)
        )));
    }
    if config.read_only {
        return Err(DatabaseError::ReadOnly);
    }

    let migration = config.migration.clone();
    db.write(|txn| {
        if let Some(migrate) = &migration {
            (**migrate)(txn, old_version, new_version)
                .map_err(|err| DatabaseError::MigrationFailed(err.to_string()))?;
        }
        let missing: Vec<TableSchema> = requested
            .tables()
            .iter()
            .filter(|t| txn.schema().find_table(t.name()).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            txn.add_tables(missing)?;
        }
        if !requested.matches(txn.schema()) {
            return Err(DatabaseError::SchemaMismatch(format!(
                "schema after migration differs: {}",
                requested.describe_differences(txn.schema())
            )));
        }
        if sync_table_missing && txn.schema().find_table(FIELD_CLOCK_TABLE).is_none() {
            txn.add_table(field_clock_schema())?;
        }
        txn.set_schema_version(new_version);
        Ok(())
    })?;
    info!(from = old_version, to = new_version, "migrated schema");
    Ok(())
}

/// Run the configured compact-on-open check
pub(crate) fn compact_if_requested(db: &Database) -> DatabaseResult<()> {
    let config = db.config();
    let Some(predicate) = config.compact_on_open.clone() else {
        return Ok(());
    };
    if config.read_only {
        return Ok(());
    }
    let store = db.store();
    let stats = store.stats();
    let file_bytes = store.file_size()?;
    let used_bytes = stats.page_count.saturating_sub(stats.free_pages) * stats.page_size as u64;
    if (*predicate)(file_bytes, used_bytes) {
        info!(file_bytes, used_bytes, "compacting on open");
        db.compact()?;
    }
    Ok(())
}
