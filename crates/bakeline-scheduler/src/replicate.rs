//! Replication of flagged outputs to their physical filesystem location.
//!
//! Replication compares the digest recorded in the destination's `.md5`
//! sidecar and skips the copy when it matches. Non-local builds take an
//! advisory file lock around the write so two machines replicating the
//! same output do not interleave.

use std::fs;
use std::io::Write;

use bakeline_hash::DataHash;
use bakeline_path::BuildFile;
use bakeline_store::DataStore;
use bakeline_transform::{OutputFlags, TransformOutput, XformId};
use camino::Utf8Path;
use tracing::{debug, error};

use crate::scheduler::BuildScheduler;
use crate::SchedulerError;

impl BuildScheduler {
    pub(crate) fn replicate_transform_outputs(&mut self, id: XformId) -> Result<(), SchedulerError> {
        let outputs: Vec<TransformOutput> = self.transform_decl(id).outputs().to_vec();

        for output in outputs {
            let should_replicate = output.flags.contains(OutputFlags::REPLICATE);
            let include_in_manifest = output.flags.contains(OutputFlags::INCLUDE_IN_MANIFEST);
            if !should_replicate && !(self.config.replicate_manifest && include_in_manifest) {
                continue;
            }

            let Some(output_hash) = self.content_hashes.content_hash(&output.path) else {
                error!(output = %output.path,
                       "failed to retrieve the hash; this file won't be replicated");
                return Ok(());
            };

            let destination = self.resolver.to_absolute(&output.path)?;

            if destination.exists() {
                if let Some(existing) = read_sidecar_hash(&destination) {
                    if existing == output_hash {
                        debug!(output = %destination, hash = %existing,
                               "destination already has the same content hash, skipping");
                        continue;
                    }
                }
            }

            let data = self
                .store
                .read_data(&BuildFile::new(output.path.clone(), output_hash))?;

            if self.config.local {
                write_replica(&destination, &data, output_hash)?;
            } else {
                let mut lock = ReplicationLock::acquire(&destination)?;
                lock.hold(|| write_replica(&destination, &data, output_hash))?;
            }

            self.log_internal(&format!("Replicated output {}[{}].", output.path, output_hash));
        }

        Ok(())
    }
}

/// Advisory cross-process lock scoped to one replicated output path.
struct ReplicationLock {
    lock: fd_lock::RwLock<fs::File>,
}

impl ReplicationLock {
    fn acquire(destination: &Utf8Path) -> Result<Self, SchedulerError> {
        let lock_path = format!("{destination}.replicate.lock");
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| SchedulerError::Replication {
                path: destination.to_string(),
                reason: e.to_string(),
            })?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| SchedulerError::Replication {
                path: destination.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ReplicationLock {
            lock: fd_lock::RwLock::new(file),
        })
    }
}

impl ReplicationLock {
    fn hold<T>(
        &mut self,
        f: impl FnOnce() -> Result<T, SchedulerError>,
    ) -> Result<T, SchedulerError> {
        let _guard = self.lock.write().map_err(|e| SchedulerError::Replication {
            path: "replication lock".to_string(),
            reason: e.to_string(),
        })?;
        f()
    }
}

fn read_sidecar_hash(destination: &Utf8Path) -> Option<DataHash> {
    let sidecar = format!("{destination}.md5");
    let text = fs::read_to_string(sidecar).ok()?;
    DataHash::from_text(text.trim()).ok()
}

fn write_replica(
    destination: &Utf8Path,
    data: &[u8],
    hash: DataHash,
) -> Result<(), SchedulerError> {
    let replication_err = |reason: String| SchedulerError::Replication {
        path: destination.to_string(),
        reason,
    };

    let parent = destination
        .parent()
        .ok_or_else(|| replication_err("destination has no parent directory".to_string()))?;
    fs::create_dir_all(parent).map_err(|e| replication_err(e.to_string()))?;

    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| replication_err(e.to_string()))?;
    temp.write_all(data)
        .map_err(|e| replication_err(e.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| replication_err(e.to_string()))?;
    temp.persist(destination)
        .map_err(|e| replication_err(e.error.to_string()))?;

    let sidecar = format!("{destination}.md5");
    fs::write(&sidecar, hash.as_text()).map_err(|e| replication_err(e.to_string()))?;

    Ok(())
}
