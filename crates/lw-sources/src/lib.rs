//! listwarden Rule Sources
//!
//! Keeps filter list sources fresh: schedules fetches with jitter and
//! backoff, downloads or reads the list, compiles it on the blocking pool
//! and reports state changes to the owner.

pub mod compile;
pub mod downloader;
pub mod handler;
pub mod schedule;
pub mod source;
pub mod source_set;
pub mod storage;

pub use compile::{compile_source, CompileInput, CompileOutcome, CompiledList};
pub use downloader::{DownloadError, Downloader, HttpDownloader};
pub use handler::{RuleSourceHandle, RuleSourceHandler, SourceDelegate, SourceEnv};
pub use schedule::{FixedJitter, Jitter, RandomJitter, SchedulePolicy};
pub use source::{RuleGroup, RuleSource, SourceOrigin};
pub use source_set::SourceSet;
pub use storage::RuleStorage;
