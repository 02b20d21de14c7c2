use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{KnowledgeError, Result};

/// Topic names loaded for every request regardless of routing. The two
/// operational-log names are resolved per-day via [`TopicStore::log_topic`].
pub const ALWAYS_ON: &[&str] = &["identity", "memory"];

/// Loads named plain-text topics from a flat directory, with an in-memory
/// cache invalidated by [`TopicStore::invalidate`] (called by the reloader
/// when the directory changes).
pub struct TopicStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl TopicStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load one topic by name, trying `<name>`, `<name>.txt`, `<name>.md`.
    pub fn load(&self, name: &str) -> Result<String> {
        if let Some(text) = self.cache.lock().unwrap().get(name) {
            return Ok(text.clone());
        }

        for candidate in [
            self.dir.join(name),
            self.dir.join(format!("{}.txt", name)),
            self.dir.join(format!("{}.md", name)),
        ] {
            match std::fs::read_to_string(&candidate) {
                Ok(text) => {
                    debug!(topic = name, path = %candidate.display(), "topic loaded");
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(name.to_string(), text.clone());
                    return Ok(text);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(KnowledgeError::TopicNotFound {
            name: name.to_string(),
        })
    }

    /// Operational-log topic name for a date, e.g. `log-2026-08-01`.
    pub fn log_topic(date: chrono::NaiveDate) -> String {
        format!("log-{}", date.format("%Y-%m-%d"))
    }

    /// Drop the cache so the next load re-reads from disk.
    pub fn invalidate(&self) {
        self.cache.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_txt_and_bare_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("identity.txt"), "I am Rainbow.").unwrap();
        std::fs::write(dir.path().join("memory"), "Remember the pool hours.").unwrap();

        let store = TopicStore::new(dir.path());
        assert_eq!(store.load("identity").unwrap(), "I am Rainbow.");
        assert_eq!(store.load("memory").unwrap(), "Remember the pool hours.");
    }

    #[test]
    fn missing_topic_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TopicStore::new(dir.path());
        assert!(matches!(
            store.load("nope"),
            Err(KnowledgeError::TopicNotFound { .. })
        ));
    }

    #[test]
    fn cache_serves_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.txt");
        std::fs::write(&path, "RM50 per night").unwrap();

        let store = TopicStore::new(dir.path());
        assert_eq!(store.load("rates").unwrap(), "RM50 per night");

        std::fs::write(&path, "RM60 per night").unwrap();
        // Still cached.
        assert_eq!(store.load("rates").unwrap(), "RM50 per night");

        store.invalidate();
        assert_eq!(store.load("rates").unwrap(), "RM60 per night");
    }

    #[test]
    fn log_topic_names_are_dated() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(TopicStore::log_topic(date), "log-2026-08-01");
    }
}
