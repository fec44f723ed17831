//! Test helpers for preparing databases and diff files.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tempfile::TempDir;

/// A scratch directory holding a database path and a diff path.
#[derive(Debug)]
pub(super) struct Workspace {
    _dir: TempDir,
    pub(super) database: Utf8PathBuf,
    pub(super) diff: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        Self {
            database: root.join("mapdiff.db"),
            diff: root.join("diff.json"),
            _dir: dir,
        }
    }
}

pub(super) fn write_utf8(path: &Utf8Path, contents: &[u8]) {
    fs::write(path.as_std_path(), contents).expect("write fixture file");
}

/// Two new nodes and a way joining them.
pub(super) const NODES_AND_WAY: &str = r#"[
    {
        "action": "create",
        "groups": [
            {"type": "node", "elements": [
                {"id": -1, "lat": 51.5, "lon": -0.1, "tags": [{"k": "amenity", "v": "bench"}]},
                {"id": -2, "lat": 51.6, "lon": -0.2}
            ]},
            {"type": "way", "elements": [
                {"id": -1, "nodes": [-1, -2], "tags": [{"k": "highway", "v": "footway"}]}
            ]}
        ]
    }
]"#;
