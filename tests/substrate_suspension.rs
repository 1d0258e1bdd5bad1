//! Suspension and wakeup across the three execution substrates.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bakeline::{
    BuildStatus, BuildTransform, DataStore, ResumeItem, ResumePayload, SnDbsJobResult,
    SnDbsJobStatus, TransformContext, TransformDecl, TransformError, TransformStatus,
};
use bakeline_remote::test_support::{PlannedFarmJob, ScriptedFarm, ScriptedSnDbs};
use common::{
    CountingTransform, FarmedTransform, PooledTransform, SharedFarm, TestPipeline, evaluate,
    input, output,
};

#[test]
fn farm_job_completion_resumes_the_transform() {
    let pipeline = TestPipeline::new();
    let resumes = Arc::new(AtomicUsize::new(0));

    let farm = SharedFarm::new(ScriptedFarm::with_plans([PlannedFarmJob::succeeding(
        "packing 12 actors\n",
    )]));

    let mut scheduler = pipeline.scheduler().with_farm(Box::new(farm.clone()));
    let packer = scheduler
        .add_build_transform(
            FarmedTransform::boxed(
                "FarmPack",
                vec![],
                vec![output("[build]/farm.bin")],
                "packer.exe --all",
                0,
                Arc::clone(&resumes),
            ),
            &[],
        )
        .unwrap();

    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);
    assert_eq!(resumes.load(Ordering::SeqCst), 1);
    assert_eq!(farm.lock().submitted.len(), 1);

    let info = scheduler.transform_info(packer.id).unwrap();
    assert_eq!(info.status, TransformStatus::OutputsUpdated);
    assert_eq!(info.farm_execution_time, 3);

    // The captured log carries the farm banner.
    assert!(info.captured_log.contains("[ Farm Output - BEGIN ]"));
    assert!(info.captured_log.contains("packing 12 actors"));
}

#[test]
fn failed_farm_job_retries_until_exhausted() {
    let pipeline = TestPipeline::new();
    let resumes = Arc::new(AtomicUsize::new(0));

    // First attempt exits 5, the retry succeeds.
    let farm = SharedFarm::new(ScriptedFarm::with_plans([
        PlannedFarmJob::failing(5, "transient farm hiccup\n"),
        PlannedFarmJob::succeeding("ok\n"),
    ]));

    let mut scheduler = pipeline.scheduler().with_farm(Box::new(farm.clone()));
    let packer = scheduler
        .add_build_transform(
            FarmedTransform::boxed(
                "FarmRetry",
                vec![],
                vec![output("[build]/retry.bin")],
                "packer.exe --retry",
                2,
                Arc::clone(&resumes),
            ),
            &[],
        )
        .unwrap();

    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);

    // Two submissions of the same command line; the transform resumed
    // once, after the successful attempt.
    let submitted = farm.lock().submitted.clone();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0], submitted[1]);
    assert_eq!(resumes.load(Ordering::SeqCst), 1);
    assert_eq!(
        scheduler.transform_info(packer.id).unwrap().status,
        TransformStatus::OutputsUpdated
    );
}

#[test]
fn farm_failure_without_retries_fails_the_transform() {
    let pipeline = TestPipeline::new();
    let resumes = Arc::new(AtomicUsize::new(0));

    let farm = SharedFarm::new(ScriptedFarm::with_plans([PlannedFarmJob::failing(
        3,
        "ERROR: out of memory packing level\n",
    )]));

    let mut scheduler = pipeline.scheduler().with_farm(Box::new(farm.clone()));
    let packer = scheduler
        .add_build_transform(
            FarmedTransform::boxed(
                "FarmFail",
                vec![],
                vec![output("[build]/fail.bin")],
                "packer.exe --fail",
                0,
                Arc::clone(&resumes),
            ),
            &[],
        )
        .unwrap();

    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::ErrorOccurred);
    assert_eq!(resumes.load(Ordering::SeqCst), 0);
    assert_eq!(farm.lock().submitted.len(), 1);

    let decl = scheduler.transform_decl(packer.id);
    assert!(
        decl.error_messages()
            .iter()
            .any(|m| m.contains("out of memory packing level"))
    );
    assert_eq!(decl.dep_mismatches(), &["Farm job failed".to_string()]);
    assert!(scheduler.failed_outputs().contains("[build]/fail.bin"));
}

#[test]
fn farm_exit_code_without_error_message_is_reported() {
    let pipeline = TestPipeline::new();
    let resumes = Arc::new(AtomicUsize::new(0));

    let farm = SharedFarm::new(ScriptedFarm::with_plans([PlannedFarmJob::failing(
        9,
        "no error lines here\n",
    )]));

    let mut scheduler = pipeline.scheduler().with_farm(Box::new(farm));
    let packer = scheduler
        .add_build_transform(
            FarmedTransform::boxed(
                "FarmSilent",
                vec![],
                vec![output("[build]/silent.bin")],
                "packer.exe --silent",
                0,
                Arc::clone(&resumes),
            ),
            &[],
        )
        .unwrap();

    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::ErrorOccurred);
    let decl = scheduler.transform_decl(packer.id);
    assert!(decl.error_messages().iter().any(|m| {
        m.contains("Executable returned an error code without printing an error message")
            && m.contains("Exit code 9")
    }));
}

#[test]
fn thread_pool_job_resumes_with_payload() {
    let pipeline = TestPipeline::new();

    let mut scheduler = pipeline.scheduler();
    let pooled = scheduler
        .add_build_transform(
            PooledTransform::boxed("PoolPack", vec![output("[build]/pooled.bin")]),
            &[],
        )
        .unwrap();

    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);
    assert_eq!(
        scheduler.transform_info(pooled.id).unwrap().status,
        TransformStatus::OutputsUpdated
    );

    // The output embeds the worker's payload.
    let hash = scheduler
        .content_hash_collection()
        .content_hash(&common::build_path("[build]/pooled.bin"))
        .unwrap();
    let data = pipeline
        .store
        .lock()
        .read_data(&bakeline::BuildFile::new(
            common::build_path("[build]/pooled.bin"),
            hash,
        ))
        .unwrap();
    assert_eq!(data, b"worker:42");
}

struct SnDbsTransform {
    decl: TransformDecl,
}

impl BuildTransform for SnDbsTransform {
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
        ctx.register_sndbs_wait_item("uncharted", "compile-17");
        Ok(TransformStatus::ResumeNeeded)
    }

    fn resume_evaluation(
        &mut self,
        ctx: &mut dyn TransformContext,
        resume: &ResumeItem,
    ) -> Result<TransformStatus, TransformError> {
        let ResumePayload::SnDbs(result) = &resume.payload else {
            return Err(TransformError::msg("expected an SN-DBS payload"));
        };
        if result.status != SnDbsJobStatus::Succeeded {
            return Err(TransformError::msg(format!(
                "SN-DBS job ended {}",
                result.status.as_str()
            )));
        }

        let path = self
            .decl
            .first_output_path()
            .cloned()
            .expect("output declared");
        ctx.store().write_data(
            &path,
            result.std_out.as_bytes(),
            bakeline::WriteOptions::default(),
        )?;
        Ok(TransformStatus::OutputsUpdated)
    }
}

#[test]
fn sndbs_job_resumes_with_banner_in_log() {
    let pipeline = TestPipeline::new();

    let mut sndbs = ScriptedSnDbs::new();
    sndbs.push_result(
        "uncharted",
        "compile-17",
        SnDbsJobResult {
            status: SnDbsJobStatus::Pending,
            ..Default::default()
        },
    );
    sndbs.push_result(
        "uncharted",
        "compile-17",
        SnDbsJobResult {
            status: SnDbsJobStatus::Succeeded,
            command: "dcc.exe -c scene.dc".to_string(),
            where_ran: "remote".to_string(),
            host_name: String::new(),
            start_time: 1_700_000_000,
            end_time: 1_700_000_004,
            std_out: "compiled scene.dc\n".to_string(),
            std_err: "deprecated flag -c\n".to_string(),
            ..Default::default()
        },
    );

    let mut decl = TransformDecl::new("DcCompile");
    decl.set_outputs(vec![output("[build]/scene.bin")]);

    let mut scheduler = pipeline.scheduler().with_sndbs(Box::new(sndbs));
    let compile = scheduler
        .add_build_transform(Box::new(SnDbsTransform { decl }), &[])
        .unwrap();

    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);

    let info = scheduler.transform_info(compile.id).unwrap();
    assert_eq!(info.status, TransformStatus::OutputsUpdated);
    let log = &info.captured_log;
    assert!(log.contains("SN-DBS Command on client 'remote' Status: succeeded"));
    assert!(log.contains("Command: dcc.exe -c scene.dc"));
    // Blank host fields are tolerated by omitting the host line.
    assert!(!log.contains("Host:"));
    assert!(log.contains("ERROR: deprecated flag -c"));
    assert!(log.contains("compiled scene.dc"));
    assert!(log.contains("Duration:   4.00 seconds"));
}

struct WaitsOnPeer {
    decl: TransformDecl,
    peer: bakeline::XformId,
    observed_peer: Arc<AtomicUsize>,
}

impl BuildTransform for WaitsOnPeer {
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
        ctx.register_transform_wait_item(self.peer);
        Ok(TransformStatus::ResumeNeeded)
    }

    fn resume_evaluation(
        &mut self,
        ctx: &mut dyn TransformContext,
        resume: &ResumeItem,
    ) -> Result<TransformStatus, TransformError> {
        let ResumePayload::Transform(peer) = &resume.payload else {
            return Err(TransformError::msg("expected a transform payload"));
        };
        self.observed_peer.store(peer.0 + 1, Ordering::SeqCst);

        let path = self
            .decl
            .first_output_path()
            .cloned()
            .expect("output declared");
        ctx.store()
            .write_data(&path, b"after peer", bakeline::WriteOptions::default())?;
        Ok(TransformStatus::OutputsUpdated)
    }
}

#[test]
fn transform_wait_item_resumes_with_peer_id() {
    let pipeline = TestPipeline::new();
    pipeline.write_source("s.txt", b"data");
    let runs = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(0));

    let mut scheduler = pipeline.scheduler();
    let peer = scheduler
        .add_build_transform(
            CountingTransform::boxed(
                "PackPeer",
                vec![input("[src]/s.txt")],
                vec![output("[build]/peer.bin")],
                Arc::clone(&runs),
            ),
            &[],
        )
        .unwrap();

    let mut decl = TransformDecl::new("PackWaiter");
    decl.set_outputs(vec![output("[build]/waiter.bin")]);
    let waiter = scheduler
        .add_build_transform(
            Box::new(WaitsOnPeer {
                decl,
                peer: peer.id,
                observed_peer: Arc::clone(&observed),
            }),
            &[],
        )
        .unwrap();

    assert_eq!(evaluate(&mut scheduler).unwrap(), BuildStatus::Ok);
    assert_eq!(
        scheduler.transform_info(waiter.id).unwrap().status,
        TransformStatus::OutputsUpdated
    );
    assert_eq!(observed.load(Ordering::SeqCst), peer.id.0 + 1);
}
