use std::collections::BTreeSet;

use bakeline_path::BuildPath;
use bakeline_transform::{InputKind, XformId};
use tracing::error;

use crate::scheduler::BuildScheduler;

/// The asset categories the pipeline builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetType {
    Actor,
    Level,
    SoundBank,
    Music,
    Movie,
    Text,
    Gameplay,
    Script,
    Shaders,
    Misc,
}

impl AssetType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            AssetType::Actor => "actor",
            AssetType::Level => "level",
            AssetType::SoundBank => "soundbank",
            AssetType::Music => "music",
            AssetType::Movie => "movie",
            AssetType::Text => "text",
            AssetType::Gameplay => "gameplay",
            AssetType::Script => "script",
            AssetType::Shaders => "shaders",
            AssetType::Misc => "misc",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<AssetType> {
        [
            AssetType::Actor,
            AssetType::Level,
            AssetType::SoundBank,
            AssetType::Music,
            AssetType::Movie,
            AssetType::Text,
            AssetType::Gameplay,
            AssetType::Script,
            AssetType::Shaders,
            AssetType::Misc,
        ]
        .into_iter()
        .find(|t| t.name() == name)
    }
}

/// Handle to a [`BuildContext`] owned by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub(crate) usize);

/// The logical asset that caused a set of transforms to be created.
#[derive(Clone, Debug)]
pub struct BuildContext {
    pub asset_name: String,
    pub asset_type: AssetType,
    /// Identifier of the build run, used to uniquify dependency keys of
    /// dependency-ignoring transforms.
    pub build_id: i64,
}

impl BuildScheduler {
    /// Take ownership of a context and return its handle.
    pub fn register_context(&mut self, context: BuildContext) -> ContextId {
        let id = ContextId(self.context_arena.len());
        self.context_arena.push(context);
        id
    }

    #[must_use]
    pub fn context(&self, id: ContextId) -> &BuildContext {
        &self.context_arena[id.0]
    }

    /// Bind an asset name to the context that builds it.
    pub fn register_asset_context(
        &mut self,
        asset_name: &str,
        asset_type: AssetType,
        context: ContextId,
    ) {
        self.asset_contexts
            .insert((asset_type, asset_name.to_string()), context);
    }

    #[must_use]
    pub fn asset_context(&self, asset_name: &str, asset_type: AssetType) -> Option<ContextId> {
        self.asset_contexts
            .get(&(asset_type, asset_name.to_string()))
            .copied()
    }

    /// All asset contexts of one type, as `(asset name, context)` pairs.
    #[must_use]
    pub fn asset_contexts(&self, asset_type: AssetType) -> Vec<(&str, ContextId)> {
        self.asset_contexts
            .iter()
            .filter(|((t, _), _)| *t == asset_type)
            .map(|((_, name), id)| (name.as_str(), *id))
            .collect()
    }

    /// The contexts a transform is tagged with.
    #[must_use]
    pub fn transform_contexts(&self, id: XformId) -> &[ContextId] {
        self.transform_contexts
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every transform tagged with `context`.
    #[must_use]
    pub fn context_transforms(&self, context: ContextId) -> Vec<XformId> {
        self.unique_xforms
            .iter()
            .copied()
            .filter(|id| self.transform_contexts(*id).contains(&context))
            .collect()
    }

    /// Tag every transitive producer feeding a context-tagged transform
    /// with that context. Executed once, after the scheduling loop, so
    /// reporting tools can attribute each transform to the assets that
    /// depended on it.
    pub(crate) fn push_contexts_to_parents(&mut self) {
        let context_ids: Vec<ContextId> = self.asset_contexts.values().copied().collect();

        for context in context_ids {
            let mut checked: BTreeSet<XformId> = BTreeSet::new();

            for id in self.unique_xforms.clone() {
                if checked.contains(&id) {
                    continue;
                }
                if self.transform_contexts(id).contains(&context) {
                    self.add_subtree_to_context(context, id, &mut checked);
                }
            }
        }
    }

    fn add_subtree_to_context(
        &mut self,
        context: ContextId,
        root: XformId,
        checked: &mut BTreeSet<XformId>,
    ) {
        let has_any_failed = !self.failed_outputs.is_empty();
        let mut stack = vec![root];

        while let Some(id) = stack.pop() {
            if !checked.insert(id) {
                continue;
            }

            let contexts = self.transform_contexts.entry(id).or_default();
            if !contexts.contains(&context) {
                contexts.push(context);
            }

            let inputs: Vec<(BuildPath, InputKind)> = {
                let Some(xform) = self.xforms[id.0].xform.as_deref() else {
                    continue;
                };
                xform
                    .decl()
                    .inputs()
                    .iter()
                    .map(|i| (i.path().clone(), i.kind))
                    .collect()
            };

            for (path, kind) in inputs {
                if kind != InputKind::HashedResource {
                    continue;
                }
                match self.output_to_xform.get(path.as_prefixed_path()) {
                    Some(parent) => {
                        if !checked.contains(parent) {
                            stack.push(*parent);
                        }
                    }
                    None => {
                        if !has_any_failed {
                            error!(input = %path, "could not find transform that writes input");
                        }
                    }
                }
            }
        }
    }
}
