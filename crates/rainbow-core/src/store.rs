//! On-disk JSON config documents with atomic writes and hot reload.
//!
//! Staff-tunable behaviour (routing table, intent keywords, workflow
//! definitions, static replies, tier settings) lives in a handful of JSON
//! files. All writes funnel through a single [`ConfigStore`], which writes a
//! temp file and renames it on the same filesystem so readers never observe a
//! partially written document. Subscribers receive a generation bump after
//! every successful write or reload and re-read a consistent snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{RainbowError, Result};

/// The document names the core reads. Anything else is rejected so a typo
/// can't silently create a new file next to the real one.
pub const DOCUMENTS: &[&str] = &[
    "routing.json",
    "intent-keywords.json",
    "intent-examples.json",
    "workflows.json",
    "settings.json",
    "knowledge.json",
];

pub struct ConfigStore {
    dir: PathBuf,
    /// Last good parsed snapshot per document. Guards both the cache and the
    /// write path, serializing all mutations.
    snapshots: Mutex<HashMap<String, serde_json::Value>>,
    reload_tx: watch::Sender<u64>,
}

impl ConfigStore {
    /// Open the store over `dir`, creating the directory if missing.
    ///
    /// Documents are parsed lazily on first [`ConfigStore::load`]; a corrupt
    /// file at that point is a hard error (refuse to start with bad config).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let (reload_tx, _) = watch::channel(0);
        Ok(Self {
            dir,
            snapshots: Mutex::new(HashMap::new()),
            reload_tx,
        })
    }

    /// Read a document, parsing from disk on first access.
    ///
    /// Missing files deserialize from `{}` so empty installs work — each
    /// document type carries serde defaults for exactly this case.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        check_name(name)?;
        let mut snapshots = self.snapshots.lock().unwrap();
        if let Some(value) = snapshots.get(name) {
            return Ok(serde_json::from_value(value.clone())?);
        }

        let value = match std::fs::read_to_string(self.dir.join(name)) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| RainbowError::Config(format!("{}: {}", name, e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                serde_json::Value::Object(Default::default())
            }
            Err(e) => return Err(e.into()),
        };
        let parsed = serde_json::from_value(value.clone())?;
        snapshots.insert(name.to_string(), value);
        Ok(parsed)
    }

    /// Replace a document atomically (temp file + rename, same filesystem)
    /// and notify subscribers.
    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        check_name(name)?;
        let json = serde_json::to_value(value)?;
        let text = serde_json::to_string_pretty(&json)?;

        let mut snapshots = self.snapshots.lock().unwrap();
        let tmp = self.dir.join(format!("{}.tmp", name));
        let dest = self.dir.join(name);
        std::fs::write(&tmp, text.as_bytes())?;
        std::fs::rename(&tmp, &dest)?;
        snapshots.insert(name.to_string(), json);
        drop(snapshots);

        self.bump();
        info!(document = name, "config document written");
        Ok(())
    }

    /// Re-read a document from disk after an external edit.
    ///
    /// A document that fails to parse keeps the previous good snapshot in
    /// place; the swap is all-or-nothing.
    pub fn reload(&self, name: &str) -> Result<()> {
        check_name(name)?;
        let text = std::fs::read_to_string(self.dir.join(name))?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => {
                self.snapshots
                    .lock()
                    .unwrap()
                    .insert(name.to_string(), value);
                self.bump();
                info!(document = name, "config document reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(document = name, error = %e, "reload failed, keeping previous snapshot");
                Err(RainbowError::Config(format!("{}: {}", name, e)))
            }
        }
    }

    /// Subscribe to reload generations. The value is an opaque counter;
    /// consumers re-`load` whatever documents they care about on change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.reload_tx.subscribe()
    }

    fn bump(&self) {
        self.reload_tx.send_modify(|gen| *gen += 1);
    }
}

fn check_name(name: &str) -> Result<()> {
    if DOCUMENTS.contains(&name) {
        Ok(())
    } else {
        Err(RainbowError::Config(format!(
            "unknown config document: {}",
            name
        )))
    }
}
