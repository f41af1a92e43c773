//! Library metadata documents - the modification-time index, the library-wide
//! smart folder definitions, and per-item file records.
//!
//! The on-disk layout is the Eagle library format:
//! - `mtime.json`: item id -> epoch-millisecond mtime, plus an `"all"` key
//!   holding the total item count
//! - `metadata.json`: library info with the `smartFolders` array
//! - `images/<id>.info/metadata.json`: one record per item
//!
//! The documents carry many keys the engine never interprets, so every struct
//! deserializes permissively with defaults.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

/// Reserved index key holding the total item count.
pub const INDEX_TOTAL_KEY: &str = "all";

/// Item id -> recorded modification time in epoch milliseconds.
pub type MtimeIndex = HashMap<String, i64>;

/// One item's metadata record (`images/<id>.info/metadata.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub ext: String,
    pub size: u64,
    pub btime: i64,
    pub mtime: i64,
    pub is_deleted: bool,
    /// Opaque associations, carried but never interpreted here.
    pub tags: Vec<serde_json::Value>,
    pub folders: Vec<serde_json::Value>,
    pub palettes: Vec<serde_json::Value>,
    pub modification_time: i64,
    pub last_modified: i64,
}

impl FileRecord {
    /// Exported file name, `<name>.<ext>`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.ext)
    }
}

/// Library-wide metadata (`metadata.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LibraryInfo {
    pub smart_folders: Vec<SmartFolder>,
    pub modification_time: i64,
    pub application_version: String,
}

/// A named category defined by an ordered list of conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartFolder {
    pub id: String,
    pub name: String,
    pub description: String,
    pub conditions: Vec<RawCondition>,
}

/// A condition as stored in the library document. Validated and compiled by
/// [`crate::rules::Classifier::compile`] before any evaluation happens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCondition {
    #[serde(default)]
    pub rules: Vec<RawRule>,
    /// Combination mode, `"AND"` or `"OR"`.
    #[serde(rename = "match", default)]
    pub match_mode: String,
    /// Expected outcome of the folded rule result, `"TRUE"` or `"FALSE"`.
    #[serde(default)]
    pub boolean: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRule {
    pub property: String,
    pub method: String,
    pub value: String,
}

/// Loads `mtime.json`. The `"all"` key must be present.
pub fn load_index(base_dir: &Path) -> Result<MtimeIndex, ExportError> {
    let path = base_dir.join("mtime.json");
    let index: MtimeIndex = parse_json_file(&path)?;
    if !index.contains_key(INDEX_TOTAL_KEY) {
        return Err(ExportError::Schema(format!(
            "index '{}' has no '{INDEX_TOTAL_KEY}' key",
            path.display()
        )));
    }
    Ok(index)
}

/// Loads `metadata.json` with the smart folder definitions.
pub fn load_library_info(base_dir: &Path) -> Result<LibraryInfo, ExportError> {
    parse_json_file(&base_dir.join("metadata.json"))
}

/// Directory holding one item's record and binary asset.
pub fn item_info_dir(base_dir: &Path, id: &str) -> PathBuf {
    base_dir.join("images").join(format!("{id}.info"))
}

/// Loads one item's [`FileRecord`].
pub fn load_file_record(base_dir: &Path, id: &str) -> Result<FileRecord, ExportError> {
    parse_json_file(&item_info_dir(base_dir, id).join("metadata.json"))
}

fn parse_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ExportError> {
    let file = File::open(path).map_err(|err| ExportError::load(path, err))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| ExportError::load(path, err))
}
