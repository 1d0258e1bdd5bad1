//! The dependency engine: recursive resolution of multi-level dependency
//! hashes and their registration as associations in the content store.
//!
//! The chain it maintains per transform, level by level:
//!
//! ```text
//! key:   hash(json(deps@N with timestamps))
//! value: (path = <first>.N.d, content = hash(json(deps@N+1 without timestamps)))
//! ```
//!
//! The terminal entry's content hash equals its own key. Resolve-time walks
//! the same chain because the without-timestamp form hashes identically no
//! matter which filesystem timestamps exist today, so long as no
//! discovered-dependency path list changed.

use std::collections::BTreeMap;

use bakeline_dep::{DepEntry, SimpleDependency, split_wildcard, wildcard_file_times_hash};
use bakeline_hash::{DataHash, hash_text};
use bakeline_path::{BuildFile, BuildPath};
use bakeline_store::{AssociationOutcome, DataStore, WriteOptions};
use bakeline_transform::{InputKind, TransformDecl, XformId};
use camino::Utf8PathBuf;
use tracing::debug;

use crate::info::SourceAssetViewStatus;
use crate::scheduler::BuildScheduler;
use crate::SchedulerError;

impl BuildScheduler {
    /// Pin every hashed-resource input to the hash its producer registered.
    pub(crate) fn populate_input_content_hashes(
        &mut self,
        _id: XformId,
        decl: &mut TransformDecl,
    ) -> Result<(), SchedulerError> {
        let lookups: Vec<(usize, BuildPath)> = decl
            .inputs()
            .iter()
            .enumerate()
            .filter(|(_, input)| input.kind != InputKind::SourceFile)
            .map(|(index, input)| (index, input.path().clone()))
            .collect();

        for (index, path) in lookups {
            let Some(hash) = self.content_hashes.content_hash(&path) else {
                return Err(SchedulerError::MissingInputHash {
                    path: path.as_prefixed_path().to_string(),
                    type_name: decl.type_name().to_string(),
                });
            };
            decl.pin_input_content_hash(index, hash);
        }

        Ok(())
    }

    /// Seed the pre-evaluate dependency record with numbered entries for
    /// every input and output. With `source_only`, only the source-file
    /// input timestamps are refreshed (the fallback after abandoning the
    /// source asset view).
    pub(crate) fn seed_pre_evaluate_dependencies(
        &mut self,
        id: XformId,
        decl: &mut TransformDecl,
        source_only: bool,
    ) -> Result<(), SchedulerError> {
        let inputs: Vec<(String, InputKind, DataHash)> = decl
            .inputs()
            .iter()
            .map(|input| {
                (
                    input.path().as_prefixed_path().to_string(),
                    input.kind,
                    input.content_hash(),
                )
            })
            .collect();

        for (index, (prefixed, kind, hash)) in inputs.into_iter().enumerate() {
            let key = format!("{}", index + 1);
            match kind {
                InputKind::SourceFile => {
                    let path = BuildPath::new(&prefixed)?;
                    let timestamp = self.file_time_for(id, &path).unwrap_or(0);
                    decl.pre_evaluate_dependencies_mut()
                        .set_input_filename_and_timestamp(
                            &format!("xformInput-{key}"),
                            &prefixed,
                            timestamp,
                        );
                }
                InputKind::HashedResource => {
                    if source_only {
                        continue;
                    }
                    decl.pre_evaluate_dependencies_mut().set_input_filename_and_hash(
                        &format!("xformInput-{key}"),
                        &prefixed,
                        hash,
                    );
                }
            }
        }

        if !source_only {
            let outputs: Vec<String> = decl
                .outputs()
                .iter()
                .map(|o| o.path.as_prefixed_path().to_string())
                .collect();
            for (index, prefixed) in outputs.into_iter().enumerate() {
                decl.pre_evaluate_dependencies_mut()
                    .set_output_filename(&format!("xformOutput-{}", index + 1), prefixed);
            }
        }

        Ok(())
    }

    /// The transform's filetime oracle: the source asset view when active
    /// for this transform, otherwise the file date cache.
    pub(crate) fn file_time_for(&mut self, id: XformId, path: &BuildPath) -> Option<i64> {
        let info = self.info.get_mut(&id).expect("registered transform");
        if info.source_asset_view_status != SourceAssetViewStatus::Ignore {
            if let Some(timestamp) = self.source_asset_view.file_time(path) {
                info.source_asset_view_status = SourceAssetViewStatus::Using;
                return Some(timestamp);
            }
        }

        let absolute = self.resolver.to_absolute(path).ok()?;
        self.file_date_cache.read_file_time(&absolute)
    }

    /// Decide whether `id` may be skipped by proving the same input closure
    /// already produced its outputs. Returns `(requires_evaluation, key)`;
    /// the key is the resolved final dependency hash when resolution
    /// succeeded.
    pub(crate) fn check_dependencies(
        &mut self,
        id: XformId,
        decl: &mut TransformDecl,
    ) -> Result<(bool, Option<DataHash>), SchedulerError> {
        self.log_trace("Checking dependencies");

        let Some(first_output) = decl.first_output_path().cloned() else {
            decl.add_dep_mismatch("Transform has no outputs");
            return Ok((true, None));
        };

        let resolved =
            self.resolve_final_dep_hash(id, &first_output, decl.pre_evaluate_dependencies())?;
        let Some(final_dep_hash) = resolved else {
            return Ok((true, None));
        };

        // All declared outputs must still be stored against this key and
        // retrievable.
        self.log_trace("Verify the existence of all transform outputs");
        let outputs: Vec<BuildPath> = decl.outputs().iter().map(|o| o.path.clone()).collect();
        for output in outputs {
            match self.store.resolve_association(final_dep_hash, &output)? {
                Some(content_hash) => {
                    let file = BuildFile::new(output.clone(), content_hash);
                    if !self.store.does_data_exist(&file) {
                        decl.add_dep_mismatch(format!(
                            "Output file '{}' is missing",
                            output.as_prefixed_path()
                        ));
                        return Ok((true, Some(final_dep_hash)));
                    }
                }
                None => {
                    decl.add_dep_mismatch(format!(
                        "No output was registered for '{}'",
                        output.as_prefixed_path()
                    ));
                    return Ok((true, Some(final_dep_hash)));
                }
            }
        }

        Ok((false, Some(final_dep_hash)))
    }

    /// Walk the association chain from the pre-evaluate record down to the
    /// final dependency hash. `None` means the chain broke and the
    /// transform must run.
    pub(crate) fn resolve_final_dep_hash(
        &mut self,
        id: XformId,
        first_output: &BuildPath,
        pre_evaluate: &SimpleDependency,
    ) -> Result<Option<DataHash>, SchedulerError> {
        let mut current_deps = pre_evaluate.clone();
        let mut depth = 0;

        loop {
            let key_hash = hash_text(&current_deps.to_json()?);
            let depth_path = first_output.with_suffix(&format!(".{depth}.d"));

            self.log_trace(&format!("Resolving dependencies with keyHash ({key_hash})"));

            let Some(content_hash) = self.store.resolve_association(key_hash, &depth_path)? else {
                self.log_trace(&format!(
                    "No registered association found for dep key '{}#{}'; the transform needs evaluation",
                    depth_path.as_prefixed_path(),
                    key_hash
                ));
                return Ok(None);
            };

            if content_hash == key_hash {
                // Leaf: no further dependencies were discovered at this
                // level last time; this key is the final hash.
                self.log_trace("Resolved to same depHash, chain is complete");
                return Ok(Some(key_hash));
            }

            let next_json = self
                .store
                .read_data(&BuildFile::new(depth_path.clone(), content_hash))?;
            let next_json = String::from_utf8(next_json).map_err(|_| {
                SchedulerError::AssociationConflict {
                    details: format!(
                        "dependency file '{}' is not valid UTF-8",
                        depth_path.as_prefixed_path()
                    ),
                }
            })?;
            current_deps = SimpleDependency::from_json(&next_json)?;

            self.log_trace("Update input timestamps");
            self.update_input_file_timestamps(id, &mut current_deps)?;
            depth += 1;
        }
    }

    /// Rewrite every path-only entry of `deps` to carry its current
    /// timestamp (or wildcard file-times hash), so the record hashes the
    /// way the registration pass would hash it today.
    pub(crate) fn update_input_file_timestamps(
        &mut self,
        id: XformId,
        deps: &mut SimpleDependency,
    ) -> Result<(), SchedulerError> {
        for key in deps.untimestamped_input_keys() {
            let Some(DepEntry::Plain(path)) = deps.input(&key) else {
                continue;
            };
            let path = path.to_string();
            let build_path = BuildPath::new(&path)?;

            if let Some(timestamp) = self.file_time_for(id, &build_path) {
                deps.set_input_filename_and_timestamp(&key, &path, timestamp);
            } else if build_path.is_wildcard() {
                let absolute = self.resolver.to_absolute(&build_path)?;
                let (dir, extension) = split_wildcard(absolute.as_str())?;
                let hash =
                    wildcard_file_times_hash(&dir, &extension, &mut self.file_date_cache)?;
                debug!(wildcard = %path, hash = %hash, "wildcard dependency hash");
                deps.set_input_filename_and_hash(&key, &path, hash);
            } else {
                debug!(path = %path, "discovered input could not be read during timestamp extraction");
                deps.add_missing_input_file(&key, path);
            }
        }
        Ok(())
    }

    /// Register the dependency chain after a successful evaluation, and
    /// return the final dependency hash the outputs are associated under.
    pub(crate) fn register_dependencies(
        &mut self,
        _id: XformId,
        decl: &TransformDecl,
    ) -> Result<DataHash, SchedulerError> {
        self.log_trace("Dependency registration started");

        let first_output = decl
            .first_output_path()
            .cloned()
            .expect("dependency registration on a transform with no outputs");

        // Pre-pass over the discovered dependencies: wildcard entries get a
        // file-times hash, regular entries get batched timestamp reads.
        let discovered: Vec<_> = decl.discovered_dependencies().collect();
        let mut wildcard_hashes: BTreeMap<String, DataHash> = BTreeMap::new();
        let mut regular_paths: Vec<(String, Utf8PathBuf)> = Vec::new();

        for dep in &discovered {
            let prefixed = dep.path.as_prefixed_path().to_string();
            let absolute = self.resolver.to_absolute(&dep.path)?;
            if dep.path.is_wildcard() {
                let (dir, extension) = split_wildcard(absolute.as_str())?;
                let hash =
                    wildcard_file_times_hash(&dir, &extension, &mut self.file_date_cache)?;
                debug!(wildcard = %prefixed, hash = %hash, "wildcard dependency hash");
                wildcard_hashes.insert(prefixed, hash);
            } else {
                regular_paths.push((prefixed, absolute));
            }
        }

        let mut regular_times: BTreeMap<String, i64> = BTreeMap::new();
        if !regular_paths.is_empty() {
            let absolutes: Vec<Utf8PathBuf> =
                regular_paths.iter().map(|(_, abs)| abs.clone()).collect();
            let times = self.file_date_cache.read_multiple_file_times(&absolutes);
            for ((prefixed, absolute), time) in regular_paths.into_iter().zip(times) {
                match time {
                    Some(timestamp) => {
                        regular_times.insert(prefixed, timestamp);
                    }
                    None => {
                        debug!(path = %absolute, "discovered input could not be read during timestamp extraction");
                    }
                }
            }
        }

        let mut current_deps = decl.pre_evaluate_dependencies().clone();
        let mut depth = 0;
        let mut dep_index = 0;

        loop {
            // Key hash of this level, carrying the previous level's
            // timestamps.
            let key_hash = hash_text(&current_deps.to_json()?);

            let mut added: Vec<(String, String)> = Vec::new();
            for dep in &discovered {
                if dep.depth_level == depth {
                    let key = format!("discoveredDep-{dep_index}");
                    let prefixed = dep.path.as_prefixed_path().to_string();
                    current_deps.set_input_filename(&key, prefixed.clone());
                    added.push((key, prefixed));
                    dep_index += 1;
                }
            }

            // Write this level without the new timestamps; its content hash
            // is exactly the next level's key hash.
            let level_json = current_deps.to_json()?;
            let depth_path = first_output.with_suffix(&format!(".{depth}.d"));
            let content_hash = self.store.write_data(
                &depth_path,
                level_json.as_bytes(),
                WriteOptions::CACHED_ASYNC_UPLOAD,
            )?;

            for (key, prefixed) in &added {
                if let Some(timestamp) = regular_times.get(prefixed) {
                    current_deps.set_input_filename_and_timestamp(key, prefixed, *timestamp);
                } else if let Some(hash) = wildcard_hashes.get(prefixed) {
                    current_deps.set_input_filename_and_hash(key, prefixed, *hash);
                } else {
                    current_deps.add_missing_input_file(key, prefixed.clone());
                }
            }

            if self.store.register_association(key_hash, &depth_path, content_hash)
                == AssociationOutcome::Conflict
            {
                let details = self.store.take_association_errors().join("; ");
                return Err(SchedulerError::AssociationConflict { details });
            }

            depth += 1;
            if added.is_empty() {
                break;
            }
        }

        let final_dep_hash = hash_text(&current_deps.to_json()?);
        self.content_hashes
            .register_content_hash(&first_output.with_suffix(".d"), final_dep_hash)?;

        self.log_trace("Dependency registration completed");
        Ok(final_dep_hash)
    }
}
