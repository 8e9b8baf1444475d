//! Schema version tracking and migrations. Migrations are additive and
//! idempotent; an existing database is backed up before any migration runs.

use std::{cmp::Ordering, path::Path};

use rocksdb::{WriteBatch, DB};
use tracing::info;

use crate::errors::RelayerError;

/// Bump this, and add a `migrate_n_to_n_plus_1` below, on any change to the
/// persisted record formats in [`crate::model`].
pub const LATEST_SCHEMA_VERSION: u32 = 1;

const DB_SCHEMA_VERSION_KEY: &[u8] = b"db_schema_version";
const BACKUPS_DIRECTORY: &str = "backups";

fn metadata_handle(db: &DB) -> &rocksdb::ColumnFamily {
    db.cf_handle("metadata").expect("metadata column family exists")
}

fn read_schema_version(db: &DB) -> Result<u32, RelayerError> {
    db.get_cf(metadata_handle(db), DB_SCHEMA_VERSION_KEY)
        .map_err(RelayerError::from)?
        .map(|bytes| {
            let array: [u8; 4] =
                bytes.try_into().map_err(|_| RelayerError::Fatal("corrupt schema version".into()))?;
            Ok(u32::from_be_bytes(array))
        })
        .unwrap_or(Ok(0))
}

fn write_schema_version(db: &DB, batch: &mut WriteBatch, version: u32) {
    batch.put_cf(metadata_handle(db), DB_SCHEMA_VERSION_KEY, version.to_be_bytes());
}

fn create_backup(path: &Path, schema_version: u32) -> Result<String, RelayerError> {
    let backup_dir_name = format!("backup_v{schema_version}_{}", chrono::Utc::now().to_rfc3339());
    let backups_root = path.parent().unwrap_or_else(|| Path::new(".")).join(BACKUPS_DIRECTORY);
    std::fs::create_dir_all(&backups_root)
        .map_err(|e| RelayerError::Fatal(format!("failed to create backup dir: {e}")))?;

    let backup_path = backups_root.join(backup_dir_name);
    let mut copy_options = fs_extra::dir::CopyOptions::new();
    copy_options.copy_inside = true;
    fs_extra::dir::copy(path, &backup_path, &copy_options)
        .map_err(|e| RelayerError::Fatal(format!("failed to back up store before migrating: {e}")))?;

    Ok(backup_path.to_string_lossy().to_string())
}

pub fn migrate_to_latest(db: &DB, db_path: &Path) -> Result<(), RelayerError> {
    let current = read_schema_version(db)?;
    info!(current, target = LATEST_SCHEMA_VERSION, "checking store schema version");

    match current.cmp(&LATEST_SCHEMA_VERSION) {
        Ordering::Equal => Ok(()),
        Ordering::Greater => Err(RelayerError::Fatal(format!(
            "store schema version {current} is ahead of this binary's {LATEST_SCHEMA_VERSION}"
        ))),
        Ordering::Less => {
            if current > 0 {
                let backup = create_backup(db_path, current)?;
                info!(backup, "created store backup before migrating");
            }

            for version in current..LATEST_SCHEMA_VERSION {
                info!(from = version, to = version + 1, "migrating store schema");
                match version {
                    0 => migrate_0_to_1(db)?,
                    other => return Err(RelayerError::Fatal(format!("no migration from version {other}"))),
                }
            }
            Ok(())
        }
    }
}

/// Establishes the initial key layout; there is no prior data to transform,
/// so this migration only stamps the schema version.
fn migrate_0_to_1(db: &DB) -> Result<(), RelayerError> {
    let mut batch = WriteBatch::default();
    write_schema_version(db, &mut batch, 1);
    db.write(batch).map_err(RelayerError::from)
}
