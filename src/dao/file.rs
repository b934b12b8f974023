//! Subscription records as JSON files.

use super::{SubscriptionDao, SubscriptionRecord};
use crate::error::{Error, Result};
use crate::types::ListenerId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File DAO configuration.
#[derive(Clone, Debug)]
pub struct FileDaoConfig {
    /// Directory holding one file per subscription.
    pub path: PathBuf,
}

impl Default for FileDaoConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./subscriptions"),
        }
    }
}

/// Stores each record in its own JSON file, replaced atomically on save.
///
/// The directory is created on first save; until then every lookup comes
/// back empty.
pub struct FileDao {
    config: FileDaoConfig,
}

impl FileDao {
    pub fn new(config: FileDaoConfig) -> Self {
        Self { config }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn record_path(&self, id: &ListenerId) -> PathBuf {
        self.config
            .path
            .join(format!("{}.{}.json", escape(&id.kind), escape(&id.id)))
    }

    fn read(path: &Path) -> Result<Option<SubscriptionRecord>> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                Error::Corruption(format!("subscription record {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl SubscriptionDao for FileDao {
    fn save(&self, record: &SubscriptionRecord) -> Result<()> {
        fs::create_dir_all(&self.config.path)?;
        let path = self.record_path(&record.listener_id);
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(record)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn one(&self, id: &ListenerId) -> Result<Option<SubscriptionRecord>> {
        Self::read(&self.record_path(id))
    }

    fn all(&self, kinds: &[String], completed: Option<bool>) -> Result<Vec<SubscriptionRecord>> {
        let entries = match fs::read_dir(&self.config.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %self.config.path.display(),
                    "subscription directory missing, treating as empty"
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read(&path)? {
                if record.matches(kinds, completed) {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| a.listener_id.cmp(&b.listener_id));
        Ok(records)
    }
}

/// Make an id safe to use as part of a file name.
fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => escaped.push(byte as char),
            _ => escaped.push_str(&format!("%{:02X}", byte)),
        }
    }
    escaped
}
