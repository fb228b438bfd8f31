//! Per-source refresh actor.
//!
//! Each [`RuleSource`] is owned by one tokio task. The task keeps a single
//! timer, runs at most one fetch at a time and reports every state change
//! through a [`SourceDelegate`]. Commands arrive over an unbounded channel
//! from the [`RuleSourceHandle`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};

use lw_core::types::{FetchResult, TrackerInfos};

use crate::compile::{compile_source, CompileInput, CompileOutcome};
use crate::downloader::Downloader;
use crate::schedule::{Jitter, SchedulePolicy};
use crate::source::{RuleSource, SourceOrigin};
use crate::storage::{read_tracker_infos, RuleStorage};

/// Receives source state changes. Called from the source's task.
pub trait SourceDelegate: Send + Sync + 'static {
    /// Fetch started, succeeded or failed.
    fn on_update(&self, source: &RuleSource);

    /// New per-domain tracker metadata is available.
    fn on_tracker_infos_update(&self, source: &RuleSource, infos: &TrackerInfos) {
        let _ = (source, infos);
    }
}

/// Everything a handler needs besides its source. Shared by all handlers
/// of a [`crate::SourceSet`].
pub struct SourceEnv<D> {
    pub downloader: Arc<D>,
    pub storage: RuleStorage,
    pub policy: SchedulePolicy,
    pub jitter: Arc<dyn Jitter>,
    pub delegate: Arc<dyn SourceDelegate>,
}

impl<D> Clone for SourceEnv<D> {
    fn clone(&self) -> Self {
        Self {
            downloader: Arc::clone(&self.downloader),
            storage: self.storage.clone(),
            policy: self.policy,
            jitter: Arc::clone(&self.jitter),
            delegate: Arc::clone(&self.delegate),
        }
    }
}

#[derive(Debug)]
enum Command {
    FetchNow,
    Clear,
    Snapshot(oneshot::Sender<RuleSource>),
    Shutdown,
}

/// Control handle of a running source task. Dropping it stops the task and
/// any download in flight.
pub struct RuleSourceHandle {
    id: u32,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<RuleSource>>,
}

impl RuleSourceHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Fetch immediately unless a fetch is already running or the source
    /// has been cleared.
    pub fn fetch_now(&self) {
        let _ = self.commands.send(Command::FetchNow);
    }

    /// Stop the timer and delete the source's compiled files.
    pub fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }

    /// Current state of the source, or `None` if the task has ended.
    pub async fn snapshot(&self) -> Option<RuleSource> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Stop the task after it has processed the commands sent so far and
    /// return the final state of the source.
    pub async fn shutdown(mut self) -> Option<RuleSource> {
        let _ = self.commands.send(Command::Shutdown);
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for RuleSourceHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

type FetchFuture = Pin<Box<dyn Future<Output = FetchDone> + Send>>;

struct FetchDone {
    generation: u64,
    outcome: CompileOutcome,
}

pub struct RuleSourceHandler<D: Downloader> {
    source: RuleSource,
    env: SourceEnv<D>,
    commands: mpsc::UnboundedReceiver<Command>,
    deadline: Option<Instant>,
    first_arm: bool,
    in_flight: Option<FetchFuture>,
    /// Bumped by `clear()`; fetches started under an older value are stale.
    generation: u64,
}

impl<D: Downloader> RuleSourceHandler<D> {
    /// Start the task owning `source`. Must be called within a tokio runtime.
    pub fn spawn(source: RuleSource, env: SourceEnv<D>) -> RuleSourceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = source.id;
        let handler = Self {
            source,
            env,
            commands: rx,
            deadline: None,
            first_arm: true,
            in_flight: None,
            generation: 0,
        };
        RuleSourceHandle {
            id,
            commands: tx,
            task: Some(tokio::spawn(handler.run())),
        }
    }

    async fn run(mut self) -> RuleSource {
        self.init().await;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = wait_deadline(self.deadline) => self.start_fetch(),
                done = wait_fetch(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.finish_fetch(done);
                }
            }
        }

        log::debug!("Source {}: handler stopped", self.source.id);
        self.source
    }

    async fn init(&mut self) {
        let now = SystemTime::now();
        if self.source.next_fetch.is_none() {
            let next = self.env.policy.initial_next_fetch(
                self.source.last_update_or_epoch(),
                self.source.unsafe_adblock_metadata.expires,
                self.env.jitter.as_ref(),
            );
            self.source.next_fetch = Some(next);
        }

        if self.source.has_tracker_infos {
            let path = self
                .env
                .storage
                .tracker_infos_path(self.source.group, self.source.id);
            match tokio::task::spawn_blocking(move || read_tracker_infos(&path)).await {
                Ok(Ok(infos)) => self.env.delegate.on_tracker_infos_update(&self.source, &infos),
                Ok(Err(err)) => log::warn!("Source {}: tracker infos unavailable: {}", self.source.id, err),
                Err(err) => log::warn!("Source {}: tracker info task failed: {}", self.source.id, err),
            }
        }

        self.arm_timer(now);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::FetchNow => {
                if self.in_flight.is_some() {
                    log::debug!("Source {}: fetch already running", self.source.id);
                } else if self.deadline.is_none() {
                    // Only `clear()` leaves an idle handler without a timer.
                    log::debug!("Source {}: cleared, fetch ignored", self.source.id);
                } else {
                    self.start_fetch();
                }
            }
            Command::Clear => self.clear(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.source.clone());
            }
            Command::Shutdown => {}
        }
    }

    fn arm_timer(&mut self, now: SystemTime) {
        let Some(next_fetch) = self.source.next_fetch else {
            self.deadline = None;
            return;
        };

        let mut delay = next_fetch.duration_since(now).unwrap_or(Duration::ZERO);
        if self.first_arm && delay.is_zero() {
            delay = self.env.policy.startup_delay(self.env.jitter.as_ref());
        }
        self.first_arm = false;

        log::debug!("Source {}: next fetch in {:?}", self.source.id, delay);
        self.deadline = Some(Instant::now() + delay);
    }

    fn start_fetch(&mut self) {
        self.deadline = None;
        self.source.is_fetching = true;
        self.env.delegate.on_update(&self.source);

        let job = FetchJob {
            origin: self.source.origin.clone(),
            downloader: Arc::clone(&self.env.downloader),
            input: CompileInput {
                source_id: self.source.id,
                list_path: Default::default(),
                delete_after_read: false,
                allow_abp_snippets: self.source.allow_abp_snippets,
                ruleset_path: self.env.storage.ruleset_path(self.source.group, self.source.id),
                tracker_infos_path: self
                    .env
                    .storage
                    .tracker_infos_path(self.source.group, self.source.id),
            },
        };
        let generation = self.generation;
        log::debug!("Source {}: fetching {:?}", self.source.id, self.source.origin);

        self.in_flight = Some(Box::pin(async move {
            FetchDone {
                generation,
                outcome: job.run().await,
            }
        }));
    }

    fn finish_fetch(&mut self, done: FetchDone) {
        self.source.is_fetching = false;

        if done.generation != self.generation {
            // Cleared while the fetch was running; undo whatever it wrote.
            log::debug!("Source {}: discarding stale fetch result", self.source.id);
            if matches!(done.outcome, CompileOutcome::Compiled(_)) {
                self.env
                    .storage
                    .remove_source_files(self.source.group, self.source.id);
            }
            self.env.delegate.on_update(&self.source);
            return;
        }

        let now = SystemTime::now();
        let policy = self.env.policy;
        let jitter = self.env.jitter.as_ref();

        match done.outcome {
            CompileOutcome::Compiled(compiled) => {
                let compiled = *compiled;
                self.source.last_fetch_result = FetchResult::Success;
                self.source.last_update = Some(now);
                self.source.next_fetch =
                    Some(policy.next_after_success(now, compiled.metadata.expires, jitter));
                self.source.rules_list_checksum = compiled.checksum;
                self.source.rules_info = compiled.rules_info;
                self.source.unsafe_adblock_metadata = compiled.metadata;
                self.source.has_tracker_infos = compiled.tracker_infos_saved;

                if let Some(infos) = &compiled.tracker_infos {
                    self.env.delegate.on_tracker_infos_update(&self.source, infos);
                }
            }
            CompileOutcome::Failed(result) => {
                log::warn!("Source {}: fetch failed: {:?}", self.source.id, result);
                self.source.last_fetch_result = result;
                self.source.next_fetch = Some(policy.next_after_failure(now, jitter));
            }
        }

        self.arm_timer(now);
        self.env.delegate.on_update(&self.source);
    }

    fn clear(&mut self) {
        self.deadline = None;
        self.source.next_fetch = None;
        self.generation += 1;
        self.env
            .storage
            .remove_source_files(self.source.group, self.source.id);
        self.source.rules_list_checksum.clear();
        self.source.has_tracker_infos = false;
        log::debug!("Source {}: cleared", self.source.id);
    }
}

/// Owned inputs of one fetch cycle.
struct FetchJob<D> {
    origin: SourceOrigin,
    downloader: Arc<D>,
    input: CompileInput,
}

impl<D: Downloader> FetchJob<D> {
    async fn run(mut self) -> CompileOutcome {
        match &self.origin {
            SourceOrigin::Url(url) => match self.downloader.download(url).await {
                Ok(path) => {
                    self.input.list_path = path;
                    self.input.delete_after_read = true;
                }
                Err(err) => {
                    log::warn!("Source {}: {}", self.input.source_id, err);
                    return CompileOutcome::Failed(FetchResult::DownloadFailed);
                }
            },
            SourceOrigin::File(path) => self.input.list_path = path.clone(),
        }

        let input = self.input;
        let source_id = input.source_id;
        let joined = tokio::task::spawn_blocking(move || compile_source(&input)).await;
        compile_task_outcome(source_id, joined)
    }
}

/// A panicked or cancelled compile counts as a failed read of the list.
fn compile_task_outcome(source_id: u32, joined: Result<CompileOutcome, JoinError>) -> CompileOutcome {
    joined.unwrap_or_else(|err| {
        log::warn!("Source {source_id}: compile task failed: {err}");
        CompileOutcome::Failed(FetchResult::FileReadError)
    })
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_fetch(in_flight: &mut Option<FetchFuture>) -> FetchDone {
    match in_flight {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::downloader::DownloadError;
    use crate::schedule::FixedJitter;
    use crate::source::RuleGroup;

    const WAIT: Duration = Duration::from_secs(10);
    const JITTER: Duration = Duration::from_secs(42);

    /// Serves scripted bodies; `None` fails the download.
    struct ScriptedDownloader {
        responses: Mutex<VecDeque<Option<String>>>,
        calls: AtomicUsize,
        temp_dir: PathBuf,
    }

    impl ScriptedDownloader {
        fn new(temp_dir: PathBuf, responses: Vec<Option<&str>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(|r| r.map(str::to_string)).collect()),
                calls: AtomicUsize::new(0),
                temp_dir,
            }
        }
    }

    impl Downloader for ScriptedDownloader {
        async fn download(&self, url: &str) -> Result<PathBuf, DownloadError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.responses.lock().unwrap().pop_front().flatten();
            match response {
                Some(body) => {
                    let path = self.temp_dir.join(format!("download-{n}.tmp"));
                    std::fs::write(&path, body)?;
                    Ok(path)
                }
                None => Err(DownloadError::EmptyBody {
                    url: url.to_string(),
                }),
            }
        }
    }

    #[derive(Debug)]
    enum Event {
        Update(RuleSource),
        TrackerInfos(TrackerInfos),
    }

    struct ChannelDelegate(mpsc::UnboundedSender<Event>);

    impl SourceDelegate for ChannelDelegate {
        fn on_update(&self, source: &RuleSource) {
            let _ = self.0.send(Event::Update(source.clone()));
        }

        fn on_tracker_infos_update(&self, _source: &RuleSource, infos: &TrackerInfos) {
            let _ = self.0.send(Event::TrackerInfos(infos.clone()));
        }
    }

    struct Harness {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        storage: RuleStorage,
        downloader: Arc<ScriptedDownloader>,
        events: mpsc::UnboundedReceiver<Event>,
        env: SourceEnv<ScriptedDownloader>,
    }

    impl Harness {
        fn new(responses: Vec<Option<&str>>, policy: SchedulePolicy) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let root = tmp.path().to_path_buf();

            let storage = RuleStorage::new(root.join("rules"));
            let downloader = Arc::new(ScriptedDownloader::new(root.clone(), responses));
            let (tx, events) = mpsc::unbounded_channel();
            let env = SourceEnv {
                downloader: Arc::clone(&downloader),
                storage: storage.clone(),
                policy,
                jitter: Arc::new(FixedJitter(JITTER)),
                delegate: Arc::new(ChannelDelegate(tx)),
            };
            Self {
                _tmp: tmp,
                root,
                storage,
                downloader,
                events,
                env,
            }
        }

        /// Wait for the next update that reports a finished fetch.
        async fn finished(&mut self) -> RuleSource {
            loop {
                let event = tokio::time::timeout(WAIT, self.events.recv())
                    .await
                    .expect("timed out waiting for update")
                    .expect("delegate dropped");
                if let Event::Update(source) = event {
                    if !source.is_fetching {
                        return source;
                    }
                }
            }
        }
    }

    fn url_source(id: u32) -> RuleSource {
        let mut source = RuleSource::new(
            id,
            RuleGroup::AdBlocking,
            SourceOrigin::Url("https://lists.example/list.txt".to_string()),
        );
        // Not due yet, so only fetch_now triggers fetches.
        source.next_fetch = Some(SystemTime::now() + Duration::from_secs(3600));
        source
    }

    fn assert_within(actual: SystemTime, lower: SystemTime, upper: SystemTime) {
        assert!(actual >= lower, "{actual:?} before {lower:?}");
        assert!(actual <= upper, "{actual:?} after {upper:?}");
    }

    #[tokio::test]
    async fn successful_fetch_updates_source_and_schedule() {
        let mut h = Harness::new(
            vec![Some("! Expires: 2 days\n||ads.example.com^\nexample.com##.ad\n")],
            SchedulePolicy::default(),
        );
        let handle = RuleSourceHandler::spawn(url_source(1), h.env.clone());

        handle.fetch_now();
        let before = SystemTime::now();
        let source = h.finished().await;
        let after = SystemTime::now();

        assert_eq!(source.last_fetch_result, FetchResult::Success);
        assert_eq!(source.rules_info.valid, 2);
        assert_eq!(source.rules_list_checksum.len(), 16);
        let last_update = source.last_update.expect("last_update set");
        assert_within(last_update, before, after);
        assert_eq!(
            source.next_fetch,
            Some(last_update + Duration::from_secs(2 * 24 * 3600) + JITTER)
        );

        assert!(h.storage.ruleset_path(RuleGroup::AdBlocking, 1).exists());
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(&h.root).unwrap().count(), 1, "temp download deleted");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failed_download_uses_retry_schedule_and_fetch_now_retries() {
        let mut h = Harness::new(
            vec![None, Some("||ads.example.com^\n")],
            SchedulePolicy::default(),
        );
        let mut source = url_source(2);
        source.next_fetch = Some(SystemTime::now() + Duration::from_secs(10 * 24 * 3600));
        let handle = RuleSourceHandler::spawn(source, h.env.clone());

        handle.fetch_now();
        let before = SystemTime::now();
        let failed = h.finished().await;
        let after = SystemTime::now();

        assert_eq!(failed.last_fetch_result, FetchResult::DownloadFailed);
        assert!(failed.last_update.is_none());
        let retry = Duration::from_secs(6 * 3600) + JITTER;
        assert_within(failed.next_fetch.unwrap(), before + retry, after + retry);

        handle.fetch_now();
        let recovered = h.finished().await;
        assert_eq!(recovered.last_fetch_result, FetchResult::Success);
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failed_parse_keeps_previous_compiled_state() {
        let mut h = Harness::new(
            vec![Some("||ads.example.com^\n"), Some("! only comments\n")],
            SchedulePolicy::default(),
        );
        let handle = RuleSourceHandler::spawn(url_source(3), h.env.clone());

        handle.fetch_now();
        let good = h.finished().await;
        let ruleset = h.storage.ruleset_path(RuleGroup::AdBlocking, 3);
        let bytes = std::fs::read(&ruleset).unwrap();

        handle.fetch_now();
        let bad = h.finished().await;
        assert_eq!(bad.last_fetch_result, FetchResult::FileFormatUnsupported);
        assert_eq!(bad.rules_list_checksum, good.rules_list_checksum);
        assert_eq!(bad.last_update, good.last_update);
        assert_eq!(bad.rules_info, good.rules_info);
        assert_eq!(std::fs::read(&ruleset).unwrap(), bytes);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn file_source_is_read_in_place() {
        let mut h = Harness::new(vec![], SchedulePolicy::default());
        let list = h.root.join("user-list.txt");
        std::fs::write(&list, "||tracker.example^$third-party\n").unwrap();

        let mut source = RuleSource::new(4, RuleGroup::Tracking, SourceOrigin::File(list.clone()));
        source.next_fetch = Some(SystemTime::now() + Duration::from_secs(3600));
        let handle = RuleSourceHandler::spawn(source, h.env.clone());

        handle.fetch_now();
        let source = h.finished().await;
        assert_eq!(source.last_fetch_result, FetchResult::Success);
        assert!(list.exists());
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);

        let missing = RuleSource::new(5, RuleGroup::Tracking, SourceOrigin::File(h.root.join("nope")));
        let missing_handle = RuleSourceHandler::spawn(missing, h.env.clone());
        missing_handle.fetch_now();
        let source = h.finished().await;
        assert_eq!(source.last_fetch_result, FetchResult::FileNotFound);

        handle.shutdown().await;
        missing_handle.shutdown().await;
    }

    #[tokio::test]
    async fn tracker_list_forwards_infos_and_clear_removes_files() {
        let mut h = Harness::new(
            vec![Some(r#"{"trackers":{"badsite.com":{"default":"block","categories":["Ad"]}},"entities":{}}"#)],
            SchedulePolicy::default(),
        );
        let handle = RuleSourceHandler::spawn(url_source(6), h.env.clone());

        handle.fetch_now();
        let mut saw_infos = false;
        let source = loop {
            match tokio::time::timeout(WAIT, h.events.recv()).await.unwrap().unwrap() {
                Event::TrackerInfos(infos) => {
                    assert_eq!(infos["badsite.com"].categories, vec!["Ad"]);
                    saw_infos = true;
                }
                Event::Update(source) if !source.is_fetching => break source,
                Event::Update(_) => {}
            }
        };
        assert!(saw_infos);
        assert!(source.has_tracker_infos);

        let ruleset = h.storage.ruleset_path(RuleGroup::AdBlocking, 6);
        let infos = h.storage.tracker_infos_path(RuleGroup::AdBlocking, 6);
        assert!(ruleset.exists() && infos.exists());

        handle.clear();
        let cleared = handle.snapshot().await.unwrap();
        assert!(!ruleset.exists());
        assert!(!infos.exists());
        assert!(cleared.next_fetch.is_none());
        assert!(!cleared.has_tracker_infos);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn fetch_now_after_clear_stays_idle() {
        let mut h = Harness::new(vec![Some("||ads.example.com^\n")], SchedulePolicy::default());
        let handle = RuleSourceHandler::spawn(url_source(10), h.env.clone());

        handle.clear();
        handle.fetch_now();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.is_fetching);
        assert!(snapshot.next_fetch.is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.events.try_recv().is_err(), "no update after clear");
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);
        assert!(!h.storage.ruleset_path(RuleGroup::AdBlocking, 10).exists());

        let stopped = handle.shutdown().await.unwrap();
        assert_eq!(stopped.last_fetch_result, FetchResult::Unknown);
    }

    #[tokio::test]
    async fn unscheduled_source_counts_expiry_from_last_update() {
        let policy = SchedulePolicy {
            initial_delay: Duration::from_millis(50),
            ..SchedulePolicy::default()
        };
        let mut h = Harness::new(vec![Some("||a.example^\n")], policy);

        let last_update = SystemTime::now() - Duration::from_secs(3600);
        let mut source = RuleSource::new(
            12,
            RuleGroup::AdBlocking,
            SourceOrigin::Url("https://lists.example/b.txt".to_string()),
        );
        source.last_update = Some(last_update);
        source.unsafe_adblock_metadata.expires = Duration::from_secs(2 * 24 * 3600);
        let handle = RuleSourceHandler::spawn(source, h.env.clone());

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(
            snapshot.next_fetch,
            Some(last_update + Duration::from_secs(2 * 24 * 3600) + JITTER)
        );

        // Well past the startup delay: a source that is not due stays idle.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn panicked_compile_counts_as_read_error() {
        let joined = tokio::task::spawn_blocking(|| -> CompileOutcome { panic!("compile blew up") }).await;
        assert!(joined.is_err());
        assert_eq!(
            compile_task_outcome(11, joined).fetch_result(),
            FetchResult::FileReadError
        );
    }

    #[tokio::test]
    async fn restart_loads_saved_tracker_infos() {
        let mut h = Harness::new(vec![], SchedulePolicy::default());
        let mut infos = TrackerInfos::new();
        infos.insert("badsite.com".to_string(), Default::default());
        crate::storage::write_tracker_infos(&h.storage.tracker_infos_path(RuleGroup::AdBlocking, 7), &infos)
            .unwrap();

        let mut source = url_source(7);
        source.has_tracker_infos = true;
        let handle = RuleSourceHandler::spawn(source, h.env.clone());

        match tokio::time::timeout(WAIT, h.events.recv()).await.unwrap().unwrap() {
            Event::TrackerInfos(loaded) => assert_eq!(loaded, infos),
            other => panic!("unexpected event {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn due_source_waits_for_startup_delay() {
        let policy = SchedulePolicy {
            initial_delay: Duration::from_millis(50),
            max_jitter: Duration::ZERO,
            ..SchedulePolicy::default()
        };
        let mut h = Harness::new(vec![Some("||a.example^\n")], policy);

        // Never fetched: the computed schedule lies in the past.
        let source = RuleSource::new(
            8,
            RuleGroup::AdBlocking,
            SourceOrigin::Url("https://lists.example/a.txt".to_string()),
        );
        let started = std::time::Instant::now();
        let handle = RuleSourceHandler::spawn(source, h.env.clone());

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.next_fetch.unwrap() < SystemTime::now());

        let fetched = h.finished().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(fetched.last_fetch_result, FetchResult::Success);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn fetch_now_is_ignored_while_fetching() {
        let mut h = Harness::new(
            vec![Some("||a.example^\n"), Some("||b.example^\n")],
            SchedulePolicy::default(),
        );
        let handle = RuleSourceHandler::spawn(url_source(9), h.env.clone());

        handle.fetch_now();
        handle.fetch_now();
        h.finished().await;
        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.is_fetching);
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }
}
