//! Blocking read, parse and compile step of a fetch cycle.
//!
//! Runs on the blocking pool with owned inputs and hands back an owned
//! outcome; handler state is never touched from here.

use std::fs;
use std::io;
use std::path::PathBuf;

use lw_compiler::{parse_content, save_ruleset};
use lw_core::types::{FetchResult, ListMetadata, RulesInfo, TrackerInfos};

use crate::storage::write_tracker_infos;

#[derive(Debug, Clone)]
pub struct CompileInput {
    pub source_id: u32,
    /// Downloaded temp file or the user's own list file.
    pub list_path: PathBuf,
    /// Set for downloads; the user's files are never deleted.
    pub delete_after_read: bool,
    pub allow_abp_snippets: bool,
    pub ruleset_path: PathBuf,
    pub tracker_infos_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledList {
    pub metadata: ListMetadata,
    pub rules_info: RulesInfo,
    pub checksum: String,
    pub tracker_infos: Option<TrackerInfos>,
    /// Whether the tracker-info side file now holds `tracker_infos`.
    pub tracker_infos_saved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    Compiled(Box<CompiledList>),
    /// Never `Success`. Previously compiled output is left as it was.
    Failed(FetchResult),
}

impl CompileOutcome {
    pub fn fetch_result(&self) -> FetchResult {
        match self {
            CompileOutcome::Compiled(_) => FetchResult::Success,
            CompileOutcome::Failed(result) => *result,
        }
    }
}

pub fn compile_source(input: &CompileInput) -> CompileOutcome {
    let bytes = fs::read(&input.list_path);
    if input.delete_after_read {
        if let Err(err) = fs::remove_file(&input.list_path) {
            log::warn!("Failed to delete {}: {}", input.list_path.display(), err);
        }
    }

    let bytes = match bytes {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("Source {}: cannot read {}: {}", input.source_id, input.list_path.display(), err);
            return CompileOutcome::Failed(if err.kind() == io::ErrorKind::NotFound {
                FetchResult::FileNotFound
            } else {
                FetchResult::FileReadError
            });
        }
    };

    let text = String::from_utf8_lossy(&bytes);
    let result = parse_content(&text, input.allow_abp_snippets);
    if !result.fetch_result.is_success() {
        log::warn!(
            "Source {}: list not usable ({:?}, {} invalid, {} unsupported)",
            input.source_id,
            result.fetch_result,
            result.rules_info.invalid,
            result.rules_info.unsupported
        );
        return CompileOutcome::Failed(result.fetch_result);
    }

    let checksum = match save_ruleset(&result, &input.ruleset_path) {
        Ok(checksum) => checksum,
        Err(err) => {
            log::warn!("Source {}: {}", input.source_id, err);
            return CompileOutcome::Failed(FetchResult::FileSaveFailed);
        }
    };

    let tracker_infos_saved = match &result.tracker_infos {
        Some(infos) => match write_tracker_infos(&input.tracker_infos_path, infos) {
            Ok(()) => true,
            Err(err) => {
                log::warn!(
                    "Source {}: failed to write {}: {}",
                    input.source_id,
                    input.tracker_infos_path.display(),
                    err
                );
                false
            }
        },
        None => {
            // A previous version of this list may have had tracker infos.
            let _ = fs::remove_file(&input.tracker_infos_path);
            false
        }
    };

    log::info!(
        "Source {}: compiled {} filter, {} cosmetic, {} scriptlet rules (checksum {})",
        input.source_id,
        result.filter_rules.len(),
        result.cosmetic_rules.len(),
        result.scriptlet_injection_rules.len(),
        checksum
    );

    CompileOutcome::Compiled(Box::new(CompiledList {
        metadata: result.metadata,
        rules_info: result.rules_info,
        checksum,
        tracker_infos: result.tracker_infos,
        tracker_infos_saved,
    }))
}
