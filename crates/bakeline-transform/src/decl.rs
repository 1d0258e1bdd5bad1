use std::collections::BTreeMap;

use bakeline_dep::SimpleDependency;
use bakeline_hash::{DataHash, hash_text};
use bakeline_path::BuildPath;
use tracing::warn;

use crate::{ContentHashCollection, TransformError, TransformInput, TransformOutput};

/// When a transform is evaluated relative to its dependency state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvaluationMode {
    #[default]
    Normal,
    /// Skip if a stored output-config key exists; otherwise dependency-check.
    Disabled,
    /// Always re-evaluate.
    Forced,
}

/// Whether dependency checking applies at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DependencyMode {
    #[default]
    DependencyChecked,
    /// Always run; the key hash is made unique per build.
    IgnoreDependency,
}

/// An input path learned only during evaluation, and the recursion depth at
/// which it was first observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredDependency {
    pub path: BuildPath,
    pub depth_level: i32,
}

/// The declarative state every transform embeds.
///
/// The scheduler reads and writes a transform exclusively through this
/// struct; the trait object around it only contributes behavior.
#[derive(Debug, Default)]
pub struct TransformDecl {
    type_name: String,
    inputs: Vec<TransformInput>,
    outputs: Vec<TransformOutput>,
    evaluation_mode: EvaluationMode,
    dependency_mode: DependencyMode,
    pre_evaluate_dependencies: SimpleDependency,
    discovered_dependencies: BTreeMap<BuildPath, i32>,
    output_content_hashes: ContentHashCollection,
    error_messages: Vec<String>,
    validation_error_messages: Vec<String>,
    dep_mismatches: Vec<String>,
    asset_dependencies: Option<serde_json::Value>,
    has_updated_outputs: bool,
}

impl TransformDecl {
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        TransformDecl {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    fn assert_mutable(&self) {
        assert!(
            !self.has_updated_outputs,
            "trying to modify transform '{}' after its outputs have been updated",
            self.type_name
        );
    }

    pub fn set_input(&mut self, input: TransformInput) {
        self.assert_mutable();
        self.inputs = vec![input];
    }

    pub fn set_inputs(&mut self, inputs: Vec<TransformInput>) {
        self.assert_mutable();
        self.inputs = inputs;
    }

    pub fn add_input(&mut self, input: TransformInput) {
        self.assert_mutable();
        self.inputs.push(input);
    }

    pub fn set_output(&mut self, output: TransformOutput) {
        self.assert_mutable();
        self.outputs = vec![output];
    }

    /// # Panics
    ///
    /// Panics when two outputs share a prefixed path; duplicate output
    /// entries are a programmer error.
    pub fn set_outputs(&mut self, outputs: Vec<TransformOutput>) {
        self.assert_mutable();

        let mut unique = std::collections::BTreeSet::new();
        for output in &outputs {
            if !unique.insert(output.path.as_prefixed_path().to_string()) {
                warn!(path = %output.path, type_name = %self.type_name,
                      "output listed multiple times");
                panic!(
                    "transform '{}' declares duplicate output '{}'",
                    self.type_name, output.path
                );
            }
        }
        self.outputs = outputs;
    }

    pub fn add_output(&mut self, output: TransformOutput) {
        self.assert_mutable();
        self.outputs.push(output);
    }

    #[must_use]
    pub fn inputs(&self) -> &[TransformInput] {
        &self.inputs
    }

    /// Pin the content hash of the input at `index`, as the scheduler does
    /// once the producing transform's hash is known.
    pub fn pin_input_content_hash(&mut self, index: usize, hash: DataHash) {
        if let Some(input) = self.inputs.get_mut(index) {
            input.file = input.file.pinned(hash);
        }
    }

    #[must_use]
    pub fn outputs(&self) -> &[TransformOutput] {
        &self.outputs
    }

    #[must_use]
    pub fn has_any_output(&self) -> bool {
        !self.outputs.is_empty()
    }

    #[must_use]
    pub fn has_input(&self, nickname: &str) -> bool {
        self.inputs.iter().any(|i| i.nickname == nickname)
    }

    /// First input carrying `nickname`. Duplicate nicknames are permitted;
    /// the first match wins.
    pub fn input(&self, nickname: &str) -> Result<&TransformInput, TransformError> {
        self.inputs
            .iter()
            .find(|i| i.nickname == nickname)
            .ok_or_else(|| TransformError::UnknownInput {
                nickname: nickname.to_string(),
                type_name: self.type_name.clone(),
            })
    }

    #[must_use]
    pub fn has_output(&self, nickname: &str) -> bool {
        self.outputs.iter().any(|o| o.nickname == nickname)
    }

    pub fn output(&self, nickname: &str) -> Result<&TransformOutput, TransformError> {
        self.outputs
            .iter()
            .find(|o| o.nickname == nickname)
            .ok_or_else(|| TransformError::UnknownOutput {
                nickname: nickname.to_string(),
                type_name: self.type_name.clone(),
            })
    }

    #[must_use]
    pub fn first_input(&self) -> Option<&TransformInput> {
        self.inputs.first()
    }

    /// The first output path is the transform's identity key within the
    /// scheduler.
    #[must_use]
    pub fn first_output_path(&self) -> Option<&BuildPath> {
        self.outputs.first().map(|o| &o.path)
    }

    #[must_use]
    pub fn evaluation_mode(&self) -> EvaluationMode {
        self.evaluation_mode
    }

    pub fn set_evaluation_mode(&mut self, mode: EvaluationMode) {
        self.evaluation_mode = mode;
    }

    pub fn enable_forced_evaluation(&mut self) {
        self.evaluation_mode = EvaluationMode::Forced;
    }

    pub fn disable_evaluation(&mut self) {
        self.evaluation_mode = EvaluationMode::Disabled;
    }

    #[must_use]
    pub fn dependency_mode(&self) -> DependencyMode {
        self.dependency_mode
    }

    pub fn set_dependency_mode(&mut self, mode: DependencyMode) {
        self.dependency_mode = mode;
    }

    #[must_use]
    pub fn pre_evaluate_dependencies(&self) -> &SimpleDependency {
        &self.pre_evaluate_dependencies
    }

    pub fn pre_evaluate_dependencies_mut(&mut self) -> &mut SimpleDependency {
        &mut self.pre_evaluate_dependencies
    }

    /// Record a dependency discovered during evaluation.
    ///
    /// Depth matters: a dependency re-observed at a shallower depth keeps
    /// the shallower level, or resolve-time walks will diverge from what
    /// was registered.
    pub fn register_discovered_dependency(&mut self, path: BuildPath, depth_level: i32) {
        self.discovered_dependencies
            .entry(path)
            .and_modify(|existing| *existing = (*existing).min(depth_level))
            .or_insert(depth_level);
    }

    /// Discovered dependencies, sorted by prefixed path.
    pub fn discovered_dependencies(&self) -> impl Iterator<Item = DiscoveredDependency> + '_ {
        self.discovered_dependencies
            .iter()
            .map(|(path, depth)| DiscoveredDependency {
                path: path.clone(),
                depth_level: *depth,
            })
    }

    /// Pin the content hash of a declared output.
    pub fn register_output_content_hash(
        &mut self,
        path: &BuildPath,
        hash: DataHash,
    ) -> Result<(), TransformError> {
        if hash.is_zero() {
            return Err(TransformError::msg(format!(
                "attempting to register an empty content hash for output [{path}]"
            )));
        }
        if !self.outputs.iter().any(|o| o.path == *path) {
            return Err(TransformError::msg(format!(
                "attempting to register an output hash for a non-existing output [{path}]"
            )));
        }
        self.output_content_hashes
            .register_content_hash(path, hash)?;
        Ok(())
    }

    #[must_use]
    pub fn output_content_hashes(&self) -> &ContentHashCollection {
        &self.output_content_hashes
    }

    pub fn output_content_hashes_mut(&mut self) -> &mut ContentHashCollection {
        &mut self.output_content_hashes
    }

    pub fn add_error_message(&mut self, message: impl Into<String>) {
        self.error_messages.push(message.into());
    }

    #[must_use]
    pub fn error_messages(&self) -> &[String] {
        &self.error_messages
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        !self.error_messages.is_empty()
    }

    pub fn add_validation_error_message(&mut self, message: impl Into<String>) {
        self.validation_error_messages.push(message.into());
    }

    #[must_use]
    pub fn validation_error_messages(&self) -> &[String] {
        &self.validation_error_messages
    }

    #[must_use]
    pub fn has_validation_error(&self) -> bool {
        !self.validation_error_messages.is_empty()
    }

    /// Record why the dependency check decided this transform must run.
    pub fn add_dep_mismatch(&mut self, reason: impl Into<String>) {
        self.dep_mismatches.push(reason.into());
    }

    #[must_use]
    pub fn dep_mismatches(&self) -> &[String] {
        &self.dep_mismatches
    }

    pub fn truncate_dep_mismatches(&mut self, len: usize) {
        self.dep_mismatches.truncate(len);
    }

    /// Opaque asset-dependency document written to `<firstOutput>.assetd`.
    pub fn set_asset_dependencies(&mut self, doc: serde_json::Value) {
        self.asset_dependencies = Some(doc);
    }

    #[must_use]
    pub fn asset_dependencies(&self) -> Option<&serde_json::Value> {
        self.asset_dependencies.as_ref()
    }

    #[must_use]
    pub fn has_updated_outputs(&self) -> bool {
        self.has_updated_outputs
    }

    pub fn mark_outputs_updated(&mut self) {
        self.has_updated_outputs = true;
    }

    /// Canonical `<firstOutput>#<hash>` string identifying this transform's
    /// output set and configuration, used as the key of the
    /// disabled-transform short-circuit map.
    #[must_use]
    pub fn output_config_string(&self) -> String {
        let mut lines: Vec<String> = self
            .outputs
            .iter()
            .map(|o| o.path.as_prefixed_path().to_string())
            .collect();
        for (key, value) in self.pre_evaluate_dependencies.config_pairs() {
            lines.push(format!("{key}={value}"));
        }

        let hash = hash_text(&lines.join("\n"));
        let first = self
            .first_output_path()
            .map(|p| p.as_prefixed_path().to_string())
            .unwrap_or_default();
        format!("{first}#{hash}")
    }
}

#[cfg(test)]
mod tests {
    use crate::OutputFlags;

    use super::*;

    fn path(p: &str) -> BuildPath {
        BuildPath::new(p).unwrap()
    }

    fn decl_with_outputs(paths: &[&str]) -> TransformDecl {
        let mut decl = TransformDecl::new("TestXform");
        decl.set_outputs(
            paths
                .iter()
                .map(|p| TransformOutput::new(path(p)))
                .collect(),
        );
        decl
    }

    #[test]
    fn nickname_lookup_first_match_wins() {
        let mut decl = TransformDecl::new("TestXform");
        decl.add_input(TransformInput::new(path("[src]/a.txt")).with_nickname("main"));
        decl.add_input(TransformInput::new(path("[src]/b.txt")).with_nickname("main"));

        assert_eq!(
            decl.input("main").unwrap().path().as_prefixed_path(),
            "[src]/a.txt"
        );
        assert!(decl.input("other").is_err());
    }

    #[test]
    #[should_panic(expected = "after its outputs have been updated")]
    fn mutation_after_update_panics() {
        let mut decl = decl_with_outputs(&["[build]/a.bin"]);
        decl.mark_outputs_updated();
        decl.add_input(TransformInput::new(path("[src]/late.txt")));
    }

    #[test]
    #[should_panic(expected = "duplicate output")]
    fn duplicate_outputs_panic() {
        let mut decl = TransformDecl::new("TestXform");
        decl.set_outputs(vec![
            TransformOutput::new(path("[build]/a.bin")),
            TransformOutput::new(path("[build]/a.bin")),
        ]);
    }

    #[test]
    fn discovered_dependency_keeps_shallowest_depth() {
        let mut decl = TransformDecl::new("TestXform");
        decl.register_discovered_dependency(path("[src]/header.dcx"), 2);
        decl.register_discovered_dependency(path("[src]/header.dcx"), 1);
        decl.register_discovered_dependency(path("[src]/header.dcx"), 3);

        let deps: Vec<_> = decl.discovered_dependencies().collect();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depth_level, 1);
    }

    #[test]
    fn output_hash_registration_is_checked() {
        let mut decl = decl_with_outputs(&["[build]/a.bin"]);
        assert!(decl
            .register_output_content_hash(&path("[build]/a.bin"), DataHash::of(b"x"))
            .is_ok());
        assert!(decl
            .register_output_content_hash(&path("[build]/other.bin"), DataHash::of(b"x"))
            .is_err());
        assert!(decl
            .register_output_content_hash(&path("[build]/a.bin"), DataHash::ZERO)
            .is_err());
    }

    #[test]
    fn output_config_string_tracks_outputs_and_config() {
        let mut a = decl_with_outputs(&["[build]/a.bin", "[build]/a.map"]);
        let mut b = decl_with_outputs(&["[build]/a.bin", "[build]/a.map"]);
        assert_eq!(a.output_config_string(), b.output_config_string());
        assert!(a.output_config_string().starts_with("[build]/a.bin#"));

        b.pre_evaluate_dependencies_mut()
            .set_config_string("variant", "ps5");
        assert_ne!(a.output_config_string(), b.output_config_string());

        a.pre_evaluate_dependencies_mut()
            .set_config_string("variant", "ps5");
        assert_eq!(a.output_config_string(), b.output_config_string());
    }

    #[test]
    fn flags_survive_on_outputs() {
        let mut decl = TransformDecl::new("TestXform");
        decl.set_output(
            TransformOutput::new(path("[build]/a.bin")).with_flags(OutputFlags::REPLICATE),
        );
        assert!(decl.outputs()[0].flags.contains(OutputFlags::REPLICATE));
    }
}
