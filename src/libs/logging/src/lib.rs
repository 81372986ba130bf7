// Copyright (c) 2019-2022 Alibaba Cloud
// Copyright (c) 2019-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io;
use std::process;
use std::result;
use std::sync::Arc;

use arc_swap::ArcSwap;
use lazy_static::lazy_static;
use slog::{o, Drain, Level, OwnedKVList, Record};

const LOG_LEVEL_DEFAULT: Level = Level::Info;

lazy_static! {
    /// Log level names accepted in configuration, with the slog level each maps to.
    pub static ref LOG_LEVELS: Vec<(&'static str, Level)> = vec![
        ("trace", Level::Trace),
        ("debug", Level::Debug),
        ("info", Level::Info),
        ("warn", Level::Warning),
        ("error", Level::Error),
        ("critical", Level::Critical),
    ];
}

/// Defines a macro `$name!()` that returns the global scoped logger tagged with `$subsystem`.
#[macro_export]
macro_rules! logger_with_subsystem {
    ($name: ident, $subsystem: expr) => {
        macro_rules! $name {
            () => {
                slog_scope::logger().new(slog::o!("subsystem" => $subsystem))
            };
        }
    };
}

/// Convert a log level name ("debug", "info", ...) into a slog level.
pub fn level_name_to_slog_level(level_name: &str) -> result::Result<Level, String> {
    for (name, level) in LOG_LEVELS.iter() {
        if *name == level_name {
            return Ok(*level);
        }
    }

    Err(format!("invalid log level: {:?}", level_name))
}

/// Convert a slog level back into the name used in configuration.
pub fn slog_level_to_level_name(level: Level) -> result::Result<&'static str, &'static str> {
    for (name, l) in LOG_LEVELS.iter() {
        if *l == level {
            return Ok(name);
        }
    }

    Err("invalid slog level")
}

/// Handle used to change the level of a logger after it has been created.
#[derive(Clone, Debug)]
pub struct LevelHandle {
    level: Arc<ArcSwap<Level>>,
}

impl LevelHandle {
    fn new(level: Level) -> Self {
        LevelHandle {
            level: Arc::new(ArcSwap::from_pointee(level)),
        }
    }

    pub fn get(&self) -> Level {
        **self.level.load()
    }

    pub fn set(&self, level: Level) {
        self.level.store(Arc::new(level));
    }
}

// A drain that filters records against a level that may be changed at runtime.
struct RuntimeLevelFilter<D> {
    drain: D,
    level: LevelHandle,
}

impl<D> Drain for RuntimeLevelFilter<D>
where
    D: Drain,
{
    type Ok = Option<D::Ok>;
    type Err = Option<D::Err>;

    fn log(
        &self,
        record: &Record,
        values: &OwnedKVList,
    ) -> result::Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.level.get()) {
            self.drain.log(record, values).map(Some).map_err(Some)
        } else {
            Ok(None)
        }
    }
}

/// Create a JSON logger writing to `writer`.
///
/// The returned guard must be kept alive for as long as records should be
/// flushed; dropping it drains the async queue.
pub fn create_logger<W>(
    name: &str,
    source: &str,
    level: Level,
    writer: W,
) -> (slog::Logger, slog_async::AsyncGuard)
where
    W: io::Write + Send + Sync + 'static,
{
    let (logger, guard, _) = create_logger_with_handle(name, source, level, writer);
    (logger, guard)
}

/// Like [`create_logger`], additionally returning a handle to adjust the level later.
pub fn create_logger_with_handle<W>(
    name: &str,
    source: &str,
    level: Level,
    writer: W,
) -> (slog::Logger, slog_async::AsyncGuard, LevelHandle)
where
    W: io::Write + Send + Sync + 'static,
{
    let json_drain = slog_json::Json::new(writer)
        .add_default_keys()
        .build()
        .fuse();

    let (async_drain, guard) = slog_async::Async::new(json_drain)
        .thread_name("slog-async-logger".into())
        .build_with_guard();

    // Filter in the caller's thread, so a level change never affects records
    // already queued.
    let handle = LevelHandle::new(level);
    let filter_drain = RuntimeLevelFilter {
        drain: async_drain.fuse(),
        level: handle.clone(),
    }
    .fuse();

    let logger = slog::Logger::root(
        filter_drain,
        o!("version" => env!("CARGO_PKG_VERSION"),
            "subsystem" => "root",
            "pid" => process::id().to_string(),
            "name" => name.to_string(),
            "source" => source.to_string()),
    );

    (logger, guard, handle)
}

/// Returns the level used when configuration does not name one.
pub fn default_level() -> Level {
    LOG_LEVEL_DEFAULT
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{debug, info, warn};
    use std::fs;
    use tempfile::NamedTempFile;

    fn read_records(path: &std::path::Path) -> Vec<serde_json::Value> {
        let content = fs::read_to_string(path).unwrap();
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_level_name_to_slog_level() {
        assert_eq!(level_name_to_slog_level("debug").unwrap(), Level::Debug);
        assert_eq!(level_name_to_slog_level("warn").unwrap(), Level::Warning);
        assert_eq!(level_name_to_slog_level("critical").unwrap(), Level::Critical);
        assert!(level_name_to_slog_level("").is_err());
        assert!(level_name_to_slog_level("DEBUG").is_err());
        assert!(level_name_to_slog_level("verbose").is_err());
    }

    #[test]
    fn test_slog_level_to_level_name() {
        for (name, level) in LOG_LEVELS.iter() {
            assert_eq!(slog_level_to_level_name(*level).unwrap(), *name);
        }
        assert_eq!(default_level(), Level::Info);
    }

    #[test]
    fn test_create_logger_writes_json() {
        let file = NamedTempFile::new().unwrap();
        let writer = file.reopen().unwrap();

        let (logger, guard) = create_logger("placement", "unit-test", Level::Info, writer);
        info!(logger, "hello"; "component" => "numa");
        debug!(logger, "suppressed");
        drop(logger);
        drop(guard);

        let records = read_records(file.path());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["msg"], "hello");
        assert_eq!(records[0]["name"], "placement");
        assert_eq!(records[0]["source"], "unit-test");
        assert_eq!(records[0]["component"], "numa");
        assert_eq!(records[0]["subsystem"], "root");
        assert!(records[0]["pid"].is_string());
    }

    #[test]
    fn test_runtime_level_change() {
        let file = NamedTempFile::new().unwrap();
        let writer = file.reopen().unwrap();

        let (logger, guard, handle) =
            create_logger_with_handle("placement", "unit-test", Level::Warning, writer);
        info!(logger, "dropped");
        warn!(logger, "queued");
        handle.set(Level::Debug);
        assert_eq!(handle.get(), Level::Debug);
        debug!(logger, "kept");
        handle.set(Level::Error);
        info!(logger, "dropped again");
        drop(logger);
        drop(guard);

        let records = read_records(file.path());
        let msgs: Vec<&str> = records.iter().map(|r| r["msg"].as_str().unwrap()).collect();
        assert_eq!(msgs, vec!["queued", "kept"]);
    }
}
