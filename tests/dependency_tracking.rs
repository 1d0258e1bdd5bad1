//! Incremental-build behavior: discovered dependencies, wildcard deps,
//! disabled-mode short-circuiting, and the association chain format.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bakeline::{
    BuildFile, BuildStatus, BuildTransform, DataStore, DependencyMode, SimpleDependency,
    TransformContext, TransformDecl, TransformError, TransformStatus, WriteOptions,
};
use bakeline::{AssetType, BuildContext};
use common::{CountingTransform, TestPipeline, build_path, evaluate, input, output, read_inputs};

/// A transform that consumes an include file it only discovers while
/// running, the way a compiler reports headers.
struct DiscoveringTransform {
    decl: TransformDecl,
    include: &'static str,
    runs: Arc<AtomicUsize>,
}

impl DiscoveringTransform {
    fn boxed(include: &'static str, runs: Arc<AtomicUsize>) -> Box<Self> {
        let mut decl = TransformDecl::new("DcCompile");
        decl.set_inputs(vec![input("[src]/main.dc")]);
        decl.set_outputs(vec![output("[build]/main.bin")]);
        Box::new(DiscoveringTransform {
            decl,
            include,
            runs,
        })
    }
}

impl BuildTransform for DiscoveringTransform {
    fn decl(&self) -> &TransformDecl {
        &self.decl
    }

    fn decl_mut(&mut self) -> &mut TransformDecl {
        &mut self.decl
    }

    fn evaluate(
        &mut self,
        ctx: &mut dyn TransformContext,
    ) -> Result<TransformStatus, TransformError> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        let include_path = build_path(self.include);
        let absolute = ctx.resolver().to_absolute(&include_path)?;
        let include_data = std::fs::read(&absolute)
            .map_err(|e| TransformError::msg(format!("read {absolute}: {e}")))?;
        self.decl.register_discovered_dependency(include_path, 0);

        let mut payload = read_inputs(&self.decl, ctx)?;
        payload.extend_from_slice(&include_data);
        let out = self.decl.first_output_path().cloned().expect("output");
        ctx.store()
            .write_data(&out, &payload, WriteOptions::default())?;
        Ok(TransformStatus::OutputsUpdated)
    }
}

#[test]
fn discovered_dependency_changes_force_rebuilds() {
    let pipeline = TestPipeline::new();
    pipeline.write_source("main.dc", b"(load \"header\")");
    pipeline.write_source("header.dcx", b"(defconst x 1)");
    pipeline.set_mtime("main.dc", 1_000);
    pipeline.set_mtime("header.dcx", 1_000);
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let mut scheduler = pipeline.scheduler();
        scheduler
            .add_build_transform(
                DiscoveringTransform::boxed("[src]/header.dcx", Arc::clone(&runs)),
                &[],
            )
            .unwrap();
        assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);
    }
    // First build ran; second resolved the two-level chain and skipped.
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Touching the *discovered* file reruns the transform even though the
    // declared input is untouched.
    pipeline.set_mtime("header.dcx", 2_000);
    let mut scheduler = pipeline.scheduler();
    scheduler
        .add_build_transform(
            DiscoveringTransform::boxed("[src]/header.dcx", Arc::clone(&runs)),
            &[],
        )
        .unwrap();
    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

/// A transform depending on every `.wav` file of a folder via a wildcard
/// discovered dependency.
struct WildcardTransform {
    decl: TransformDecl,
    runs: Arc<AtomicUsize>,
}

impl WildcardTransform {
    fn boxed(runs: Arc<AtomicUsize>) -> Box<Self> {
        let mut decl = TransformDecl::new("SoundBank");
        decl.set_inputs(vec![input("[src]/bank.def")]);
        decl.set_outputs(vec![output("[build]/bank.bnk")]);
        Box::new(WildcardTransform { decl, runs })
    }
}

impl BuildTransform for WildcardTransform {
    fn decl(&self) -> &TransformDecl {
        &self.decl
    }

    fn decl_mut(&mut self) -> &mut TransformDecl {
        &mut self.decl
    }

    fn evaluate(
        &mut self,
        ctx: &mut dyn TransformContext,
    ) -> Result<TransformStatus, TransformError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.decl
            .register_discovered_dependency(build_path("[src]/sounds/*.wav"), 0);

        let payload = read_inputs(&self.decl, ctx)?;
        let out = self.decl.first_output_path().cloned().expect("output");
        ctx.store()
            .write_data(&out, &payload, WriteOptions::default())?;
        Ok(TransformStatus::OutputsUpdated)
    }
}

#[test]
fn wildcard_dependency_tracks_the_folder() {
    let pipeline = TestPipeline::new();
    pipeline.write_source("bank.def", b"sounds/*.wav");
    pipeline.write_source("sounds/rain.wav", b"RIFF-rain");
    pipeline.write_source("sounds/wind.wav", b"RIFF-wind");
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let mut scheduler = pipeline.scheduler();
        scheduler
            .add_build_transform(WildcardTransform::boxed(Arc::clone(&runs)), &[])
            .unwrap();
        assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // A new wav file lands in the folder: the file-times hash changes and
    // the bank rebuilds.
    pipeline.write_source("sounds/thunder.wav", b"RIFF-thunder");
    let mut scheduler = pipeline.scheduler();
    scheduler
        .add_build_transform(WildcardTransform::boxed(Arc::clone(&runs)), &[])
        .unwrap();
    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn disabled_transform_short_circuits_from_stored_key() {
    let pipeline = TestPipeline::new();
    pipeline.write_source("s.txt", b"data");
    let runs = Arc::new(AtomicUsize::new(0));

    let make = |disabled: bool| {
        let mut xform = CountingTransform::boxed(
            "PackDisabled",
            vec![input("[src]/s.txt")],
            vec![output("[build]/disabled.bin")],
            Arc::clone(&runs),
        );
        if disabled {
            xform.decl_mut().disable_evaluation();
        }
        xform
    };

    {
        let mut first = pipeline.scheduler();
        first.add_build_transform(make(false), &[]).unwrap();
        assert_eq!(evaluate(&mut first).unwrap(), BuildStatus::Ok);
    }

    let mut second = pipeline.scheduler();
    let added = second.add_build_transform(make(true), &[]).unwrap();
    assert_eq!(evaluate(&mut second).unwrap(), BuildStatus::Ok);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let decl = second.transform_decl(added.id);
    assert_eq!(decl.dep_mismatches(), &["Disabled".to_string()]);
    assert!(second.updated_outputs().contains("[build]/disabled.bin"));
}

#[test]
fn dependency_ignoring_transform_always_runs() {
    let pipeline = TestPipeline::new();
    pipeline.write_source("s.txt", b"data");
    let runs = Arc::new(AtomicUsize::new(0));

    let make = || {
        let mut xform = CountingTransform::boxed(
            "UploadFolder",
            vec![input("[src]/s.txt")],
            vec![output("[build]/upload.marker")],
            Arc::clone(&runs),
        );
        xform
            .decl_mut()
            .set_dependency_mode(DependencyMode::IgnoreDependency);
        xform
    };

    for build_id in [1, 2] {
        let mut scheduler = pipeline.scheduler();
        let ctx = scheduler.register_context(BuildContext {
            asset_name: "uploads".to_string(),
            asset_type: AssetType::Misc,
            build_id,
        });
        let added = scheduler.add_build_transform(make(), &[ctx]).unwrap();
        assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);

        let decl = scheduler.transform_decl(added.id);
        assert_eq!(decl.dep_mismatches(), &["Ignore Deps".to_string()]);
        // The build id uniquifies the dependency record.
        assert_eq!(
            decl.pre_evaluate_dependencies()
                .entries()
                .get("config-_SchedulerIgnoreDepsBuildId"),
            Some(&build_id.to_string())
        );
    }
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn terminal_association_entry_round_trips() {
    let pipeline = TestPipeline::new();
    pipeline.write_source("s.txt", b"data");
    let runs = Arc::new(AtomicUsize::new(0));

    let mut scheduler = pipeline.scheduler();
    scheduler
        .add_build_transform(
            CountingTransform::boxed(
                "PackA",
                vec![input("[src]/s.txt")],
                vec![output("[build]/a.bin")],
                Arc::clone(&runs),
            ),
            &[],
        )
        .unwrap();
    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);

    // With no discovered dependencies the chain is one level deep and the
    // terminal entry's key equals its content hash.
    let final_dep_hash = scheduler
        .content_hash_collection()
        .content_hash(&build_path("[build]/a.bin.d"))
        .unwrap();
    let mut store = pipeline.store.lock();
    let level0 = store
        .resolve_association(final_dep_hash, &build_path("[build]/a.bin.0.d"))
        .unwrap()
        .expect("level-0 association");
    assert_eq!(level0, final_dep_hash);

    // The stored record parses back and hashes to the same key.
    let json = store
        .read_data(&BuildFile::new(build_path("[build]/a.bin.0.d"), level0))
        .unwrap();
    let record = SimpleDependency::from_json(std::str::from_utf8(&json).unwrap()).unwrap();
    assert_eq!(record.key_hash().unwrap(), final_dep_hash);
    assert!(
        record
            .entries()
            .keys()
            .any(|k| k.starts_with("input-xformInput-1"))
    );
    assert_eq!(
        record.entries().get("output-xformOutput-1"),
        Some(&"[build]/a.bin".to_string())
    );
}

#[test]
fn validate_outputs_forces_reevaluation() {
    let pipeline = TestPipeline::new();
    pipeline.write_source("s.txt", b"data");
    let runs = Arc::new(AtomicUsize::new(0));

    let make = || {
        CountingTransform::boxed(
            "PackV",
            vec![input("[src]/s.txt")],
            vec![output("[build]/levels/city.pak")],
            Arc::clone(&runs),
        )
    };

    {
        let mut first = pipeline.scheduler();
        first.add_build_transform(make(), &[]).unwrap();
        assert_eq!(evaluate(&mut first).unwrap(), BuildStatus::Ok);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // A substring match on validate_outputs marks the transform for
    // validation, which forces the rerun.
    let mut config = bakeline::BuildSchedulerConfig::default();
    config.validate_outputs = vec!["levels/".to_string()];
    let mut second = pipeline.scheduler_with(config);
    let added = second.add_build_transform(make(), &[]).unwrap();
    assert_eq!(evaluate(&mut second).unwrap(), BuildStatus::Ok);

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(second.transform_info(added.id).unwrap().validate);
    assert_eq!(
        second.transform_decl(added.id).dep_mismatches(),
        &["Forced update".to_string()]
    );
}
