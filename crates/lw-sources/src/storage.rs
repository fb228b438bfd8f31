//! On-disk layout of compiled rulesets and tracker-info side files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lw_core::types::TrackerInfos;

use crate::source::RuleGroup;

/// Output locations under a root directory:
/// `<root>/<group>/<id>.dat` and `<root>/<group>/<id>_tracker_infos.json`.
#[derive(Debug, Clone)]
pub struct RuleStorage {
    root: PathBuf,
}

impl RuleStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_dir(&self, group: RuleGroup) -> PathBuf {
        self.root.join(group.dir_name())
    }

    pub fn ruleset_path(&self, group: RuleGroup, id: u32) -> PathBuf {
        self.group_dir(group).join(format!("{id}.dat"))
    }

    pub fn tracker_infos_path(&self, group: RuleGroup, id: u32) -> PathBuf {
        self.group_dir(group).join(format!("{id}_tracker_infos.json"))
    }

    /// Delete both output files of a source. Missing files are fine.
    pub fn remove_source_files(&self, group: RuleGroup, id: u32) {
        for path in [self.ruleset_path(group, id), self.tracker_infos_path(group, id)] {
            match fs::remove_file(&path) {
                Ok(()) => log::debug!("Removed {}", path.display()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => log::warn!("Failed to remove {}: {}", path.display(), err),
            }
        }
    }
}

pub fn write_tracker_infos(path: &Path, infos: &TrackerInfos) -> io::Result<()> {
    let json = serde_json::to_vec(infos).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)
}

pub fn read_tracker_infos(path: &Path) -> io::Result<TrackerInfos> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
