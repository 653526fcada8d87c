//! File-backed read-marker cache.
//!
//! Remembers which message ids the current user has already confirmed read,
//! so repeated visits to a room do not re-issue read calls for old
//! messages. This is a cache, not a durable store: losing it only costs a
//! redundant backend call. One file per (room, user) pair.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use wardline_shared::constants::IDEMPOTENCE_SET_CAP;
use wardline_shared::{RoomId, UserId};

use crate::error::Result;

/// Read markers for one (room, user) pair.
#[derive(Debug)]
pub struct ReadMarkerCache {
    path: PathBuf,
    read_ids: HashSet<String>,
}

impl ReadMarkerCache {
    /// Open (or create) the cache file for a room/user pair.
    pub fn open(dir: &Path, room: &RoomId, user: &UserId) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "read_markers_{}_{}.json",
            sanitize(room.as_str()),
            sanitize(user.as_str())
        ));

        let read_ids = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<HashSet<String>>(&data) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt read-marker cache, starting empty");
                    HashSet::new()
                }
            },
            Err(_) => HashSet::new(),
        };

        Ok(Self { path, read_ids })
    }

    pub fn is_read(&self, message_id: &str) -> bool {
        self.read_ids.contains(message_id)
    }

    /// Record a confirmed read and persist. Evicts the whole set when it
    /// grows past the cap; stale markers only cost one redundant call each.
    pub fn mark(&mut self, message_id: &str) -> Result<()> {
        if self.read_ids.len() >= IDEMPOTENCE_SET_CAP {
            self.read_ids.clear();
        }
        self.read_ids.insert(message_id.to_string());
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.read_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_ids.is_empty()
    }

    fn persist(&self) -> Result<()> {
        let data = serde_json::to_string(&self.read_ids)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}
