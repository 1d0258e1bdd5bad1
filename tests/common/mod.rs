//! Shared fixtures for the scheduler integration suites.

#![allow(dead_code)]

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bakeline::{
    BuildFile, BuildPath, BuildScheduler, BuildSchedulerConfig, BuildStatus, BuildTransform,
    DataHash, DataStore, FarmConfig, FarmJob, FarmJobId, FarmJobSpec, FarmSession, InputKind,
    PathResolver, ResumeItem, ResumePayload, SchedulerError, TransformContext, TransformDecl,
    TransformError, TransformInput, TransformOutput, TransformStatus, WriteOptions,
};
use bakeline_remote::test_support::ScriptedFarm;
use bakeline_store::{AssociationOutcome, MemoryDataStore, StoreError};
use camino::Utf8PathBuf;

/// A clonable store handle so tests can keep inspecting (and reusing) the
/// store after the scheduler took its boxed copy.
#[derive(Clone)]
pub struct SharedStore(pub Arc<Mutex<MemoryDataStore>>);

impl SharedStore {
    pub fn new() -> Self {
        SharedStore(Arc::new(Mutex::new(MemoryDataStore::new())))
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, MemoryDataStore> {
        self.0.lock().unwrap()
    }
}

impl DataStore for SharedStore {
    fn write_data(
        &mut self,
        path: &BuildPath,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<DataHash, StoreError> {
        self.lock().write_data(path, data, options)
    }

    fn read_data(&mut self, file: &BuildFile) -> Result<Vec<u8>, StoreError> {
        self.lock().read_data(file)
    }

    fn does_data_exist(&mut self, file: &BuildFile) -> bool {
        self.lock().does_data_exist(file)
    }

    fn register_association(
        &mut self,
        key: DataHash,
        path: &BuildPath,
        content: DataHash,
    ) -> AssociationOutcome {
        self.lock().register_association(key, path, content)
    }

    fn resolve_association(
        &mut self,
        key: DataHash,
        path: &BuildPath,
    ) -> Result<Option<DataHash>, StoreError> {
        self.lock().resolve_association(key, path)
    }

    fn retrieve_disabled_transform_key_hash(&mut self, config: &str) -> Option<DataHash> {
        self.lock().retrieve_disabled_transform_key_hash(config)
    }

    fn store_disabled_transform_key_hash(&mut self, config: &str, key: DataHash) {
        self.lock().store_disabled_transform_key_hash(config, key);
    }

    fn commit_changes(&mut self) -> Result<(), StoreError> {
        self.lock().commit_changes()
    }

    fn take_association_errors(&mut self) -> Vec<String> {
        self.lock().take_association_errors()
    }

    fn validation_errors(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().validation_errors()
    }
}

/// A clonable farm handle, for the same reason.
#[derive(Clone)]
pub struct SharedFarm(pub Arc<Mutex<ScriptedFarm>>);

impl SharedFarm {
    pub fn new(farm: ScriptedFarm) -> Self {
        SharedFarm(Arc::new(Mutex::new(farm)))
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, ScriptedFarm> {
        self.0.lock().unwrap()
    }
}

impl FarmSession for SharedFarm {
    fn configure(&mut self, config: &FarmConfig) {
        self.lock().configure(config);
    }

    fn submit_job(&mut self, spec: &FarmJobSpec) -> FarmJobId {
        self.lock().submit_job(spec)
    }

    fn done_jobs(&mut self) -> Vec<FarmJobId> {
        self.lock().done_jobs()
    }

    fn job(&self, id: FarmJobId) -> Option<FarmJob> {
        self.lock().job(id)
    }
}

/// A pipeline workspace on disk plus a store that survives across builds.
pub struct TestPipeline {
    pub temp: tempfile::TempDir,
    pub store: SharedStore,
}

impl TestPipeline {
    pub fn new() -> Self {
        TestPipeline {
            temp: tempfile::tempdir().unwrap(),
            store: SharedStore::new(),
        }
    }

    pub fn root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.temp.path().to_path_buf()).unwrap()
    }

    pub fn resolver(&self) -> PathResolver {
        PathResolver::rooted_at(self.root())
    }

    /// Create a source file and return its `[src]` build path.
    pub fn write_source(&self, relative: &str, contents: &[u8]) -> BuildPath {
        let absolute = self.source_abs(relative);
        fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        fs::write(&absolute, contents).unwrap();
        BuildPath::new(format!("[src]/{relative}")).unwrap()
    }

    pub fn source_abs(&self, relative: &str) -> Utf8PathBuf {
        self.root().join("src").join(relative)
    }

    /// Pin a file's modification time to an absolute unix second.
    pub fn set_mtime(&self, relative: &str, unix_secs: u64) {
        let file = fs::File::options()
            .write(true)
            .open(self.source_abs(relative))
            .unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(unix_secs))
            .unwrap();
    }

    pub fn scheduler(&self) -> BuildScheduler {
        self.scheduler_with(BuildSchedulerConfig::default())
    }

    pub fn scheduler_with(&self, config: BuildSchedulerConfig) -> BuildScheduler {
        BuildScheduler::new(config, self.resolver(), Box::new(self.store.clone()))
    }
}

pub fn evaluate(scheduler: &mut BuildScheduler) -> Result<BuildStatus, SchedulerError> {
    scheduler.evaluate(&FarmConfig::default(), false, "bakeline-test")
}

pub fn build_path(path: &str) -> BuildPath {
    BuildPath::new(path).unwrap()
}

pub fn output(path: &str) -> TransformOutput {
    TransformOutput::new(build_path(path))
}

pub fn input(path: &str) -> TransformInput {
    TransformInput::new(build_path(path))
}

/// A transform that concatenates its input contents into each output and
/// counts how many times it actually ran.
pub struct CountingTransform {
    decl: TransformDecl,
    runs: Arc<AtomicUsize>,
    per_output_salts: Vec<Vec<u8>>,
}

impl CountingTransform {
    pub fn boxed(
        type_name: &str,
        inputs: Vec<TransformInput>,
        outputs: Vec<TransformOutput>,
        runs: Arc<AtomicUsize>,
    ) -> Box<Self> {
        Self::boxed_with_salts(type_name, inputs, outputs, runs, Vec::new())
    }

    /// `per_output_salts[i]` is appended to output `i`'s payload, to steer
    /// individual output contents between builds.
    pub fn boxed_with_salts(
        type_name: &str,
        inputs: Vec<TransformInput>,
        outputs: Vec<TransformOutput>,
        runs: Arc<AtomicUsize>,
        per_output_salts: Vec<Vec<u8>>,
    ) -> Box<Self> {
        let mut decl = TransformDecl::new(type_name);
        decl.set_inputs(inputs);
        decl.set_outputs(outputs);
        Box::new(CountingTransform {
            decl,
            runs,
            per_output_salts,
        })
    }
}

pub fn read_inputs(
    decl: &TransformDecl,
    ctx: &mut dyn TransformContext,
) -> Result<Vec<u8>, TransformError> {
    let mut combined = Vec::new();
    for input in decl.inputs().to_vec() {
        match input.kind {
            InputKind::SourceFile => {
                let absolute = ctx.resolver().to_absolute(input.path())?;
                let data = fs::read(&absolute)
                    .map_err(|e| TransformError::msg(format!("read {absolute}: {e}")))?;
                combined.extend_from_slice(&data);
            }
            InputKind::HashedResource => {
                let data = ctx.store().read_data(&input.file)?;
                combined.extend_from_slice(&data);
            }
        }
    }
    Ok(combined)
}

impl BuildTransform for CountingTransform {
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

        let combined = read_inputs(&self.decl, ctx)?;
        let outputs: Vec<(usize, BuildPath)> = self
            .decl
            .outputs()
            .iter()
            .enumerate()
            .map(|(i, o)| (i, o.path.clone()))
            .collect();
        for (index, path) in outputs {
            let mut payload = combined.clone();
            payload.extend_from_slice(path.as_prefixed_path().as_bytes());
            if let Some(salt) = self.per_output_salts.get(index) {
                payload.extend_from_slice(salt);
            }
            ctx.store()
                .write_data(&path, &payload, WriteOptions::default())?;
        }

        Ok(TransformStatus::OutputsUpdated)
    }
}

/// A transform that runs its work as a farm job and finishes on resume.
pub struct FarmedTransform {
    decl: TransformDecl,
    command_line: String,
    num_retries: u32,
    pub resumes: Arc<AtomicUsize>,
}

impl FarmedTransform {
    pub fn boxed(
        type_name: &str,
        inputs: Vec<TransformInput>,
        outputs: Vec<TransformOutput>,
        command_line: &str,
        num_retries: u32,
        resumes: Arc<AtomicUsize>,
    ) -> Box<Self> {
        let mut decl = TransformDecl::new(type_name);
        decl.set_inputs(inputs);
        decl.set_outputs(outputs);
        Box::new(FarmedTransform {
            decl,
            command_line: command_line.to_string(),
            num_retries,
            resumes,
        })
    }
}

impl BuildTransform for FarmedTransform {
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
        ctx.submit_farm_job(
            FarmJobSpec {
                command_line: self.command_line.clone(),
                required_memory: 2 << 30,
                num_threads: 1,
                remotable: true,
            },
            self.num_retries,
        )?;
        Ok(TransformStatus::ResumeNeeded)
    }

    fn resume_evaluation(
        &mut self,
        ctx: &mut dyn TransformContext,
        resume: &ResumeItem,
    ) -> Result<TransformStatus, TransformError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        let ResumePayload::Farm(job) = &resume.payload else {
            return Err(TransformError::msg("expected a farm resume payload"));
        };

        let outputs: Vec<BuildPath> = self.decl.outputs().iter().map(|o| o.path.clone()).collect();
        for path in outputs {
            let mut payload = job.output.clone().into_bytes();
            payload.extend_from_slice(path.as_prefixed_path().as_bytes());
            ctx.store()
                .write_data(&path, &payload, WriteOptions::default())?;
        }
        Ok(TransformStatus::OutputsUpdated)
    }
}

/// A transform that offloads a computation to the local thread pool.
pub struct PooledTransform {
    decl: TransformDecl,
}

impl PooledTransform {
    pub fn boxed(type_name: &str, outputs: Vec<TransformOutput>) -> Box<Self> {
        let mut decl = TransformDecl::new(type_name);
        decl.set_outputs(outputs);
        Box::new(PooledTransform { decl })
    }
}

impl BuildTransform for PooledTransform {
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
        let handle = ctx
            .thread_pool()
            .submit(|| Box::new(6u32 * 7) as Box<dyn std::any::Any + Send>);
        ctx.register_thread_pool_wait_item(handle);
        Ok(TransformStatus::ResumeNeeded)
    }

    fn resume_evaluation(
        &mut self,
        ctx: &mut dyn TransformContext,
        resume: &ResumeItem,
    ) -> Result<TransformStatus, TransformError> {
        let ResumePayload::ThreadJob(payload) = &resume.payload else {
            return Err(TransformError::msg("expected a thread job payload"));
        };
        let value = payload
            .downcast_ref::<u32>()
            .ok_or_else(|| TransformError::msg("unexpected worker payload type"))?;

        let outputs: Vec<BuildPath> = self.decl.outputs().iter().map(|o| o.path.clone()).collect();
        for path in outputs {
            ctx.store().write_data(
                &path,
                format!("worker:{value}").as_bytes(),
                WriteOptions::default(),
            )?;
        }
        Ok(TransformStatus::OutputsUpdated)
    }
}
