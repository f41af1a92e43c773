//! End-to-end export tests against a local write target, on generated
//! library fixtures.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use serde_json::json;
use tempfile::TempDir;

use pixport_core::{
    CancelToken, ExportError, ExportOptions, History, Library, LocalTarget, Target, TargetStat,
};

const ASSET_MTIME_SECS: i64 = 1_600_000_000;
const ASSET_MTIME_MS: i64 = ASSET_MTIME_SECS * 1000;

struct Item<'a> {
    id: &'a str,
    name: &'a str,
    ext: &'a str,
    deleted: bool,
    content: &'a str,
}

impl<'a> Item<'a> {
    fn live(id: &'a str, name: &'a str, ext: &'a str, content: &'a str) -> Self {
        Self {
            id,
            name,
            ext,
            deleted: false,
            content,
        }
    }
}

/// Builds an Eagle-style library: mtime.json, metadata.json and one
/// `images/<id>.info/` directory per item, with asset mtimes pinned so the
/// index agrees with the filesystem.
fn make_library(dir: &Path, items: &[Item], smart_folders: serde_json::Value) {
    let mut index = serde_json::Map::new();
    index.insert("all".into(), json!(items.len()));
    for item in items {
        index.insert(item.id.into(), json!(ASSET_MTIME_MS));
    }
    fs::write(dir.join("mtime.json"), json!(index).to_string()).unwrap();
    fs::write(
        dir.join("metadata.json"),
        json!({ "smartFolders": smart_folders }).to_string(),
    )
    .unwrap();

    for item in items {
        let info_dir = dir.join("images").join(format!("{}.info", item.id));
        fs::create_dir_all(&info_dir).unwrap();
        fs::write(
            info_dir.join("metadata.json"),
            json!({
                "id": item.id,
                "name": item.name,
                "ext": item.ext,
                "size": item.content.len(),
                "isDeleted": item.deleted,
            })
            .to_string(),
        )
        .unwrap();
        let asset = info_dir.join(format!("{}.{}", item.name, item.ext));
        fs::write(&asset, item.content).unwrap();
        filetime::set_file_times(
            &asset,
            FileTime::from_unix_time(ASSET_MTIME_SECS, 0),
            FileTime::from_unix_time(ASSET_MTIME_SECS, 0),
        )
        .unwrap();
    }
}

fn library(dir: &Path) -> Library {
    Library::new(dir, Arc::new(LocalTarget), None)
}

fn library_with_history(dir: &Path, history_path: &Path) -> Library {
    let history = History::open(history_path).unwrap();
    history.load().unwrap();
    Library::new(dir, Arc::new(LocalTarget), Some(history))
}

fn options(group_by_folder: bool) -> ExportOptions {
    ExportOptions {
        group_by_folder,
        ..Default::default()
    }
}

fn asset_mtime(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

/// Local target whose recursive remove always fails, for exercising the
/// force-clean abort path.
struct UnremovableTarget(LocalTarget);

impl Target for UnremovableTarget {
    fn name(&self) -> &'static str {
        "unremovable"
    }

    fn stat(&self, path: &Path) -> io::Result<Option<TargetStat>> {
        self.0.stat(path)
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        self.0.mkdir_all(path)
    }

    fn remove_all(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "remove denied",
        ))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.0.rename(from, to)
    }

    fn set_times(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> io::Result<()> {
        self.0.set_times(path, atime, mtime)
    }

    fn read_to(&self, path: &Path, writer: &mut dyn Write) -> io::Result<u64> {
        self.0.read_to(path, writer)
    }

    fn write_from(&self, path: &Path, reader: &mut dyn Read) -> io::Result<u64> {
        self.0.write_from(path, reader)
    }
}

fn pets_folder() -> serde_json::Value {
    json!([{
        "name": "Pets",
        "conditions": [{
            "rules": [{"property": "name", "method": "contain", "value": "cat"}],
            "match": "OR",
            "boolean": "TRUE"
        }]
    }])
}

#[test]
fn ungrouped_export_lands_at_the_root() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let lib = library(src.path());
    let summary = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    let dst = out.path().join("cat.jpg");
    assert_eq!(fs::read_to_string(&dst).unwrap(), "bytes");
    assert_eq!(summary.copied, 1);
    assert_eq!(summary.items, 1);
    assert_eq!(summary.bytes_copied, 5);
    assert_eq!(
        asset_mtime(&dst),
        UNIX_EPOCH + Duration::from_secs(ASSET_MTIME_SECS as u64),
        "destination mtime must match the source's"
    );
}

#[test]
fn grouped_export_without_categories_uses_uncategorized() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let lib = library(src.path());
    lib.export(out.path(), &options(true)).unwrap();
    lib.close().unwrap();

    assert!(out.path().join("uncategorized/cat.jpg").is_file());
}

#[test]
fn grouped_export_places_matches_under_their_folder() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(
        src.path(),
        &[
            Item::live("f1", "cat", "jpg", "meow"),
            Item::live("f2", "dog", "jpg", "woof"),
        ],
        pets_folder(),
    );

    let lib = library(src.path());
    let summary = lib.export(out.path(), &options(true)).unwrap();
    lib.close().unwrap();

    assert!(out.path().join("Pets/cat.jpg").is_file());
    assert!(out.path().join("uncategorized/dog.jpg").is_file());
    assert_eq!(summary.copied, 2);
}

#[test]
fn deleted_records_are_never_exported() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(
        src.path(),
        &[
            Item::live("f1", "cat", "jpg", "meow"),
            Item {
                id: "f2",
                name: "gone",
                ext: "jpg",
                deleted: true,
                content: "x",
            },
        ],
        json!([]),
    );

    let lib = library(src.path());
    let summary = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    assert!(out.path().join("cat.jpg").is_file());
    assert!(!out.path().join("gone.jpg").exists());
    assert_eq!(summary.items, 2);
    assert_eq!(summary.copied, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.deleted, 1);
    assert_eq!(
        summary.items,
        summary.copied + summary.skipped + summary.deleted,
        "the summary must add up"
    );
}

#[test]
fn second_run_copies_nothing() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let lib = library(src.path());
    let first = lib.export(out.path(), &options(false)).unwrap();
    let second = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    assert_eq!(first.copied, 1);
    assert_eq!(second.copied, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(fs::read_to_string(out.path().join("cat.jpg")).unwrap(), "bytes");
}

#[test]
fn history_short_circuits_and_gains_no_duplicate_entries() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let history_path = src.path().join("history.jsonl");
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let lib = library_with_history(src.path(), &history_path);
    let first = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();
    assert_eq!(first.copied, 1);

    // fresh session replaying the log, as a second invocation would
    let lib = library_with_history(src.path(), &history_path);
    let second = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    assert_eq!(second.copied, 0);
    assert_eq!(second.skipped, 1);
    let log = fs::read_to_string(&history_path).unwrap();
    assert_eq!(log.lines().count(), 1, "no new entries on a no-op run");
}

#[test]
fn history_hit_with_missing_destination_still_copies() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let history_path = src.path().join("history.jsonl");
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let lib = library_with_history(src.path(), &history_path);
    lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    // destination emptied between runs; the history entry must not be trusted
    fs::remove_file(out.path().join("cat.jpg")).unwrap();

    let lib = library_with_history(src.path(), &history_path);
    let summary = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    assert_eq!(summary.copied, 1);
    assert_eq!(
        fs::read_to_string(out.path().join("cat.jpg")).unwrap(),
        "bytes"
    );
}

#[test]
fn overwrite_forces_a_recopy() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let lib = library(src.path());
    lib.export(out.path(), &options(false)).unwrap();

    // corrupt the destination but restore its timestamps, so no mtime
    // trigger holds
    let dst = out.path().join("cat.jpg");
    fs::write(&dst, "junk!").unwrap();
    filetime::set_file_times(
        &dst,
        FileTime::from_unix_time(ASSET_MTIME_SECS, 0),
        FileTime::from_unix_time(ASSET_MTIME_SECS, 0),
    )
    .unwrap();

    let summary = lib.export(out.path(), &options(false)).unwrap();
    assert_eq!(summary.copied, 0, "timestamps say current, so no copy");
    assert_eq!(fs::read_to_string(&dst).unwrap(), "junk!");

    let opts = ExportOptions {
        overwrite: true,
        ..options(false)
    };
    let summary = lib.export(out.path(), &opts).unwrap();
    lib.close().unwrap();
    assert_eq!(summary.copied, 1);
    assert_eq!(fs::read_to_string(&dst).unwrap(), "bytes");
}

#[test]
fn force_clean_removes_unrelated_destination_files() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let stale = out.path().join("output");
    fs::create_dir_all(stale.join("old")).unwrap();
    fs::write(stale.join("old/stale.txt"), "stale").unwrap();

    let lib = library(src.path());
    lib.export(&stale, &ExportOptions {
        force_clean: true,
        ..options(false)
    })
    .unwrap();
    lib.close().unwrap();

    assert!(!stale.join("old").exists());
    assert!(stale.join("cat.jpg").is_file());
}

#[test]
fn force_clean_failure_aborts_with_no_copies() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let lib = Library::new(
        src.path().to_path_buf(),
        Arc::new(UnremovableTarget(LocalTarget)),
        None,
    );
    let err = lib
        .export(out.path(), &ExportOptions {
            force_clean: true,
            ..options(false)
        })
        .unwrap_err();
    lib.close().unwrap();

    assert!(matches!(err, ExportError::Io { .. }), "got {err:?}");
    assert!(
        fs::read_dir(out.path()).unwrap().next().is_none(),
        "no file may be copied after a failed clean"
    );
}

#[test]
fn missing_item_metadata_fails_only_that_item() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(
        src.path(),
        &[
            Item::live("f1", "cat", "jpg", "meow"),
            Item::live("f2", "dog", "jpg", "woof"),
        ],
        json!([]),
    );
    fs::remove_file(src.path().join("images/f2.info/metadata.json")).unwrap();

    let lib = library(src.path());
    let err = lib.export(out.path(), &options(false)).unwrap_err();
    lib.close().unwrap();

    assert!(matches!(err, ExportError::Load { .. }), "got {err:?}");
    assert!(
        out.path().join("cat.jpg").is_file(),
        "sibling task must still complete"
    );
}

#[test]
fn missing_all_key_aborts_before_any_copy() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));
    fs::write(src.path().join("mtime.json"), json!({"f1": 1000}).to_string()).unwrap();

    let lib = library(src.path());
    let err = lib.export(out.path(), &options(false)).unwrap_err();
    lib.close().unwrap();

    assert!(matches!(err, ExportError::Schema(_)), "got {err:?}");
    assert!(!out.path().join("cat.jpg").exists());
}

#[test]
fn malformed_smart_folder_aborts_before_any_copy() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(
        src.path(),
        &[Item::live("f1", "cat", "jpg", "bytes")],
        json!([{
            "name": "Bad",
            "conditions": [{
                "rules": [{"property": "rating", "method": "equal", "value": "5"}],
                "match": "AND",
                "boolean": "TRUE"
            }]
        }]),
    );

    let lib = library(src.path());
    let err = lib.export(out.path(), &options(true)).unwrap_err();
    lib.close().unwrap();

    assert!(matches!(err, ExportError::Schema(_)), "got {err:?}");
    assert!(!out.path().join("uncategorized/cat.jpg").exists());
}

#[test]
fn cancelled_token_aborts_with_no_copies() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let cancel = CancelToken::new();
    cancel.cancel();
    let lib = library(src.path());
    let err = lib
        .export(out.path(), &ExportOptions {
            cancel,
            ..options(false)
        })
        .unwrap_err();
    lib.close().unwrap();

    assert!(matches!(err, ExportError::Cancelled), "got {err:?}");
    assert!(!out.path().join("cat.jpg").exists());
}

#[test]
fn source_mtime_change_triggers_a_recopy() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let lib = library(src.path());
    lib.export(out.path(), &options(false)).unwrap();

    let asset = src.path().join("images/f1.info/cat.jpg");
    fs::write(&asset, "newer").unwrap();
    filetime::set_file_times(
        &asset,
        FileTime::from_unix_time(ASSET_MTIME_SECS + 60, 0),
        FileTime::from_unix_time(ASSET_MTIME_SECS + 60, 0),
    )
    .unwrap();

    let summary = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();
    assert_eq!(summary.copied, 1);
    assert_eq!(fs::read_to_string(out.path().join("cat.jpg")).unwrap(), "newer");
}

#[test]
fn export_works_through_the_target_trait_object() {
    // exercises the injection seam the engine relies on
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "bytes")], json!([]));

    let target: Arc<dyn Target> = Arc::new(LocalTarget);
    let lib = Library::new(src.path().to_path_buf(), target, None);
    lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();
    assert!(out.path().join("cat.jpg").is_file());
}

#[test]
fn destination_paths_are_one_to_one_with_items() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let items: Vec<String> = (0..20).map(|i| format!("img{i:02}")).collect();
    let fixtures: Vec<Item> = items
        .iter()
        .map(|id| Item::live(id, id, "png", "pixels"))
        .collect();
    make_library(src.path(), &fixtures, json!([]));

    let lib = library(src.path());
    let summary = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    assert_eq!(summary.copied, 20);
    for id in &items {
        assert!(out.path().join(format!("{id}.png")).is_file());
    }
}

#[test]
fn history_survives_an_unrelated_second_item() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let history_path = src.path().join("history.jsonl");
    make_library(src.path(), &[Item::live("f1", "cat", "jpg", "meow")], json!([]));

    let lib = library_with_history(src.path(), &history_path);
    lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    // grow the library, re-export
    make_library(
        src.path(),
        &[
            Item::live("f1", "cat", "jpg", "meow"),
            Item::live("f2", "dog", "jpg", "woof"),
        ],
        json!([]),
    );
    let lib = library_with_history(src.path(), &history_path);
    let summary = lib.export(out.path(), &options(false)).unwrap();
    lib.close().unwrap();

    assert_eq!(summary.copied, 1, "only the new item is copied");
    assert_eq!(summary.skipped, 1);

    let mut paths: Vec<PathBuf> = fs::read_dir(out.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    paths.sort();
    assert_eq!(paths.len(), 2);
}
