//! Disk persistence for trees.
//!
//! Two formats are supported:
//! - **JSON layout** (`nodes` + optional `layers`), the interchange format for
//!   trees built by an external pipeline.
//! - **Binary snapshots** (`.tree`): bincode payload followed by a CRC32
//!   footer. Writes use atomic temp-file + rename so an interrupted refinement
//!   run never leaves a half-written tree behind.

use crate::error::{Error, Result};
use crate::storage::tree::Tree;
use std::fs;
use std::path::{Path, PathBuf};

/// Magic bytes appended before the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"TTR1";

/// Writes `bytes` to `path` through a sibling temp file and a rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Save a tree as a binary snapshot with a CRC32 footer.
/// Layout: [bincode payload][magic "TTR1"][u32 CRC32 BE].
pub fn save_snapshot(tree: &Tree, path: &Path) -> Result<()> {
    let bytes = bincode::serialize(tree).map_err(|e| Error::Snapshot(e.to_string()))?;
    let crc = crc32fast::hash(&bytes);

    let mut output = Vec::with_capacity(bytes.len() + 8);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());
    write_atomic(path, &output)?;

    tracing::info!(
        "Saved tree snapshot {:?} ({} nodes, {} bytes, CRC32={:#010x})",
        path,
        tree.len(),
        bytes.len(),
        crc
    );
    Ok(())
}

/// Load a binary snapshot, verifying its CRC32 footer.
pub fn load_snapshot(path: &Path) -> Result<Tree> {
    let raw = fs::read(path)?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(Error::Snapshot(format!(
            "{:?} is not a tree snapshot (missing CRC footer)",
            path
        )));
    }

    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(Error::Snapshot(format!(
            "snapshot CRC32 mismatch: expected {:#010x}, got {:#010x}. File may be corrupted: {:?}",
            stored_crc, computed_crc, path
        )));
    }
    tracing::debug!("Snapshot CRC32 verified: {:#010x}", stored_crc);

    let tree: Tree = bincode::deserialize(payload).map_err(|e| Error::Snapshot(e.to_string()))?;
    tracing::info!(
        "Loaded tree snapshot {:?} ({} nodes, {} layers)",
        path,
        tree.len(),
        tree.num_layers()
    );
    Ok(tree)
}

/// Load a tree from its JSON layout.
pub fn load_tree_json(path: &Path) -> Result<Tree> {
    let raw = fs::read(path)?;
    let tree: Tree = serde_json::from_slice(&raw)
        .map_err(|e| Error::Snapshot(format!("{:?}: {}", path, e)))?;
    tracing::info!(
        "Loaded tree {:?} ({} nodes, {} layers)",
        path,
        tree.len(),
        tree.num_layers()
    );
    Ok(tree)
}

/// Save a tree as pretty-printed JSON layout.
pub fn save_tree_json(tree: &Tree, path: &Path) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(tree).map_err(|e| Error::Snapshot(e.to_string()))?;
    write_atomic(path, &bytes)?;
    tracing::info!("Saved tree {:?} ({} nodes)", path, tree.len());
    Ok(())
}

/// Load a tree, choosing the format from the file extension:
/// `.json` is read as a layout, anything else as a binary snapshot.
pub fn load_tree(path: &Path) -> Result<Tree> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => load_tree_json(path),
        _ => load_snapshot(path),
    }
}

/// Save a tree, choosing the format from the file extension like [`load_tree`].
pub fn save_tree(tree: &Tree, path: &Path) -> Result<()> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => save_tree_json(tree, path),
        _ => save_snapshot(tree, path),
    }
}
