use std::path::Path;
use std::sync::Arc;

use lw_core::types::TrackerInfos;
use lw_sources::{
    HttpDownloader, RandomJitter, RuleSource, RuleStorage, SourceDelegate, SourceEnv, SourceSet,
};

use crate::config::{load_policy, load_sources, load_state, resume_sources, save_state};

const STATE_FILE: &str = "sources_state.json";

/// Logs source state changes.
struct LogDelegate;

impl SourceDelegate for LogDelegate {
    fn on_update(&self, source: &RuleSource) {
        if source.is_fetching {
            log::info!("Source {}: fetching", source.id);
            return;
        }
        let title = source.unsafe_adblock_metadata.title.as_deref().unwrap_or("-");
        log::info!(
            "Source {} ({}): {:?}, {} rules, checksum {}, next fetch {:?}",
            source.id,
            title,
            source.last_fetch_result,
            source.rules_info.valid,
            if source.rules_list_checksum.is_empty() { "-" } else { &source.rules_list_checksum },
            source.next_fetch
        );
    }

    fn on_tracker_infos_update(&self, source: &RuleSource, infos: &TrackerInfos) {
        log::info!("Source {}: {} tracker entries", source.id, infos.len());
    }
}

pub fn cmd_watch(
    sources_path: &Path,
    root: &Path,
    policy_path: Option<&Path>,
    fetch_now: bool,
) -> Result<(), String> {
    let configs = load_sources(sources_path)?;
    let policy = load_policy(policy_path)?;
    let state_path = root.join(STATE_FILE);
    let sources = resume_sources(&configs, load_state(&state_path));

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))?;
    let final_state = runtime.block_on(async move {
        let downloader = HttpDownloader::new(root.join("tmp")).map_err(|e| e.to_string())?;
        let env = SourceEnv {
            downloader: Arc::new(downloader),
            storage: RuleStorage::new(root),
            policy,
            jitter: Arc::new(RandomJitter::new()),
            delegate: Arc::new(LogDelegate),
        };

        let mut set = SourceSet::new(env);
        for source in sources {
            set.add(source);
        }
        log::info!("Watching {} sources under '{}'", set.len(), root.display());
        if fetch_now {
            set.fetch_all();
        }

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Failed to wait for interrupt: {}", e))?;
        log::info!("Interrupted, stopping");
        Ok::<_, String>(set.shutdown().await)
    })?;

    save_state(&state_path, &final_state)?;
    println!("Saved state of {} sources to '{}'", final_state.len(), state_path.display());
    Ok(())
}
