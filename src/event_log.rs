//! Append-only per-session event journal (C1).
//!
//! Each session's events live in `<workspace_root>/<session_id>/events.jsonl`,
//! one JSON object per line. Appends are atomic at line granularity via
//! `OpenOptions::new().create(true).append(true)`, the same durability
//! pattern the teacher's `ThoughtChain::append_with_refs` uses for its own
//! JSONL log — without the SHA-256 hash-chaining, which is specific to
//! ThoughtChain's tamper-evidence goal and has no counterpart here.
//!
//! An optional in-memory cache (a [`DashMap`] keyed by session id) mirrors
//! the file for read-heavy endpoints. Write failures are logged as warnings
//! and never propagated — event emission is best-effort auxiliary, per
//! spec.md §4.1 and §7 (`EventLogWriteFailure`).

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;

use crate::event::{Event, EventType};

/// Optional multi-criteria query against a session's event log.
///
/// Mirrors `original_source`'s `EventLog.get_events_filtered`: `tick_index`
/// is an exact match, `tick_min`/`tick_max` are an inclusive range, `agent_id`
/// matches `metadata.agent_id`/`from_agent`/`sender`, and `limit` retains the
/// most recent N entries after all other filters are applied.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub tick_index: Option<i64>,
    pub tick_min: Option<i64>,
    pub tick_max: Option<i64>,
    pub agent_id: Option<String>,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(want) = self.tick_index {
            if event.tick_index() != Some(want) {
                return false;
            }
        }
        if self.tick_min.is_some() || self.tick_max.is_some() {
            match event.tick_index() {
                Some(tick) => {
                    if let Some(min) = self.tick_min {
                        if tick < min {
                            return false;
                        }
                    }
                    if let Some(max) = self.tick_max {
                        if tick > max {
                            return false;
                        }
                    }
                }
                None => return false,
            }
        }
        if let Some(want) = &self.agent_id {
            match event.agent_id() {
                Some(got) if got == want => {}
                _ => return false,
            }
        }
        true
    }
}

/// Append-only event journal, shared behind an `Arc` by every component
/// that emits or queries events.
pub struct EventLog {
    workspace_root: PathBuf,
    use_cache: bool,
    cache: DashMap<String, Vec<Event>>,
    // Serializes concurrent appends to the same process's files, per
    // spec.md §5 ("concurrent appends from the same process must be
    // serialized to guarantee atomic line writes").
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            use_cache: true,
            cache: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn without_cache(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            use_cache: false,
            cache: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.workspace_root.join(session_id)
    }

    fn event_file(&self, session_id: &str) -> io::Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        Ok(dir.join("events.jsonl"))
    }

    fn read_from_disk(path: &Path) -> io::Result<Vec<Event>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(err) => log::warn!("skipping malformed event log line: {}", err),
            }
        }
        Ok(events)
    }

    fn load(&self, session_id: &str) -> io::Result<Vec<Event>> {
        if !self.use_cache {
            let path = self.event_file(session_id)?;
            return Self::read_from_disk(&path);
        }
        if let Some(cached) = self.cache.get(session_id) {
            return Ok(cached.clone());
        }
        let path = self.event_file(session_id)?;
        let events = Self::read_from_disk(&path)?;
        self.cache.insert(session_id.to_string(), events.clone());
        Ok(events)
    }

    /// Append one event to disk (and cache). Never returns an error to a
    /// caller that treats event emission as best-effort; callers that want
    /// the `EventLogWriteFailure` signal can still inspect the `Result`.
    pub fn append(&self, event: Event) -> io::Result<()> {
        let _guard = self.write_lock.lock().unwrap();

        let path = self.event_file(&event.session_id)?;
        let line = serde_json::to_string(&event)
            .map_err(|e| io::Error::other(format!("failed to serialize event: {}", e)))?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", line)?;

        if self.use_cache {
            self.cache
                .entry(event.session_id.clone())
                .or_insert_with(Vec::new)
                .push(event);
        }
        Ok(())
    }

    /// Append an event, logging (never propagating) any write failure. This
    /// is the call shape the tick engine and message bus use.
    pub fn append_best_effort(&self, event: Event) {
        let session_id = event.session_id.clone();
        if let Err(err) = self.append(event) {
            log::warn!("failed to append event log for session {}: {}", session_id, err);
        }
    }

    pub fn get_events(&self, session_id: &str, event_type: Option<EventType>) -> Vec<Event> {
        let events = self.load(session_id).unwrap_or_default();
        match event_type {
            Some(t) => events.into_iter().filter(|e| e.event_type == t).collect(),
            None => events,
        }
    }

    pub fn get_events_filtered(&self, session_id: &str, filter: &EventFilter) -> Vec<Event> {
        let events = self.load(session_id).unwrap_or_default();
        let mut filtered: Vec<Event> = events.into_iter().filter(|e| filter.matches(e)).collect();
        if let Some(limit) = filter.limit {
            if filtered.len() > limit {
                let drop = filtered.len() - limit;
                filtered.drain(0..drop);
            }
        }
        filtered
    }

    pub fn get_latest(&self, session_id: &str, limit: usize) -> Vec<Event> {
        let events = self.load(session_id).unwrap_or_default();
        let start = events.len().saturating_sub(limit);
        events[start..].to_vec()
    }

    pub fn count(&self, session_id: &str) -> usize {
        self.load(session_id).unwrap_or_default().len()
    }

    /// Replace a session's event file with empty content, used by
    /// simulation reset.
    pub fn truncate(&self, session_id: &str) -> io::Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.event_file(session_id)?;
        fs::write(&path, b"")?;
        if self.use_cache {
            self.cache.insert(session_id.to_string(), Vec::new());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path());
        log.append(Event::new(EventType::TickAdvanced, "s-1", "tick")).unwrap();
        log.append(Event::new(EventType::MessageSent, "s-1", "msg")).unwrap();

        assert_eq!(log.count("s-1"), 2);
        let only_ticks = log.get_events("s-1", Some(EventType::TickAdvanced));
        assert_eq!(only_ticks.len(), 1);
    }

    #[test]
    fn filter_by_tick_range_and_limit() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path());
        for tick in 0..5 {
            log.append(
                Event::new(EventType::TickAdvanced, "s-1", "tick")
                    .with_metadata(serde_json::json!({"tick_index": tick})),
            )
            .unwrap();
        }

        let filter = EventFilter {
            tick_min: Some(1),
            tick_max: Some(3),
            ..Default::default()
        };
        let result = log.get_events_filtered("s-1", &filter);
        assert_eq!(result.len(), 3);

        let limited = log.get_events_filtered(
            "s-1",
            &EventFilter { limit: Some(2), ..Default::default() },
        );
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[1].tick_index(), Some(4));
    }

    #[test]
    fn truncate_empties_the_log() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path());
        log.append(Event::new(EventType::TickAdvanced, "s-1", "tick")).unwrap();
        log.truncate("s-1").unwrap();
        assert_eq!(log.count("s-1"), 0);
    }
}
