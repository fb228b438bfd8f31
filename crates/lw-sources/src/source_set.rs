use std::collections::BTreeMap;

use crate::downloader::Downloader;
use crate::handler::{RuleSourceHandle, RuleSourceHandler, SourceEnv};
use crate::source::RuleSource;

/// Runs one handler per source, keyed by source id.
pub struct SourceSet<D: Downloader> {
    env: SourceEnv<D>,
    handles: BTreeMap<u32, RuleSourceHandle>,
}

impl<D: Downloader> SourceSet<D> {
    pub fn new(env: SourceEnv<D>) -> Self {
        Self {
            env,
            handles: BTreeMap::new(),
        }
    }

    /// Start managing `source`. A running handler with the same id is
    /// replaced; its files are kept.
    pub fn add(&mut self, source: RuleSource) {
        let id = source.id;
        let handle = RuleSourceHandler::spawn(source, self.env.clone());
        if self.handles.insert(id, handle).is_some() {
            log::debug!("Source {id}: handler replaced");
        }
    }

    /// Decommission a source: delete its files and stop its handler.
    pub async fn remove(&mut self, id: u32) -> Option<RuleSource> {
        let handle = self.handles.remove(&id)?;
        handle.clear();
        handle.shutdown().await
    }

    pub fn fetch_now(&self, id: u32) -> bool {
        match self.handles.get(&id) {
            Some(handle) => {
                handle.fetch_now();
                true
            }
            None => false,
        }
    }

    pub fn fetch_all(&self) {
        for handle in self.handles.values() {
            handle.fetch_now();
        }
    }

    pub async fn get(&self, id: u32) -> Option<RuleSource> {
        self.handles.get(&id)?.snapshot().await
    }

    /// Snapshots of every source, ordered by id.
    pub async fn sources(&self) -> Vec<RuleSource> {
        let mut sources = Vec::with_capacity(self.handles.len());
        for handle in self.handles.values() {
            if let Some(source) = handle.snapshot().await {
                sources.push(source);
            }
        }
        sources
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.handles.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every handler and return the final source states for
    /// persistence.
    pub async fn shutdown(self) -> Vec<RuleSource> {
        let mut sources = Vec::with_capacity(self.handles.len());
        for (_, handle) in self.handles {
            if let Some(source) = handle.shutdown().await {
                sources.push(source);
            }
        }
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use lw_core::types::FetchResult;
    use tokio::sync::Notify;

    use crate::downloader::DownloadError;
    use crate::handler::SourceDelegate;
    use crate::schedule::{FixedJitter, SchedulePolicy};
    use crate::source::{RuleGroup, SourceOrigin};
    use crate::storage::RuleStorage;

    struct StaticDownloader {
        dir: PathBuf,
        calls: AtomicUsize,
    }

    impl Downloader for StaticDownloader {
        async fn download(&self, _url: &str) -> Result<PathBuf, DownloadError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let path = self.dir.join(format!("set-download-{n}.tmp"));
            std::fs::write(&path, "||ads.example.com^\n")?;
            Ok(path)
        }
    }

    #[derive(Default)]
    struct CountingDelegate {
        finished: AtomicUsize,
        notify: Notify,
    }

    impl SourceDelegate for CountingDelegate {
        fn on_update(&self, source: &RuleSource) {
            if !source.is_fetching {
                self.finished.fetch_add(1, Ordering::SeqCst);
                self.notify.notify_one();
            }
        }
    }

    fn source(id: u32) -> RuleSource {
        let mut source = RuleSource::new(
            id,
            RuleGroup::AdBlocking,
            SourceOrigin::Url(format!("https://lists.example/{id}.txt")),
        );
        source.next_fetch = Some(SystemTime::now() + Duration::from_secs(3600));
        source
    }

    #[tokio::test]
    async fn manages_sources_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let storage = RuleStorage::new(root.join("rules"));
        let delegate = Arc::new(CountingDelegate::default());
        let env = SourceEnv {
            downloader: Arc::new(StaticDownloader {
                dir: root.to_path_buf(),
                calls: AtomicUsize::new(0),
            }),
            storage: storage.clone(),
            policy: SchedulePolicy::default(),
            jitter: Arc::new(FixedJitter(Duration::ZERO)),
            delegate: delegate.clone(),
        };

        let mut set = SourceSet::new(env);
        set.add(source(2));
        set.add(source(1));
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![1, 2]);
        assert!(!set.fetch_now(3));

        set.fetch_all();
        while delegate.finished.load(Ordering::SeqCst) < 2 {
            tokio::time::timeout(Duration::from_secs(10), delegate.notify.notified())
                .await
                .expect("fetches should finish");
        }

        let fetched = set.get(1).await.unwrap();
        assert_eq!(fetched.last_fetch_result, FetchResult::Success);
        assert!(storage.ruleset_path(RuleGroup::AdBlocking, 1).exists());

        let removed = set.remove(1).await.unwrap();
        assert_eq!(removed.id, 1);
        assert!(!storage.ruleset_path(RuleGroup::AdBlocking, 1).exists());
        assert!(storage.ruleset_path(RuleGroup::AdBlocking, 2).exists());
        assert!(set.get(1).await.is_none());

        let remaining = set.shutdown().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, 2);
    }
}
