use bakeline_path::BuildPath;
use bakeline_store::WriteOptions;
use bakeline_transform::{
    BuildTransform, DependencyMode, TransformContext, TransformDecl, TransformError,
    TransformOutput, TransformStatus,
};

use crate::SchedulerError;

/// Synthetic transform appended after the scheduling loop; its captured log
/// (and therefore its `.log` side file) is the scheduler's own execution
/// log, so the build report can display it like any other transform.
pub(crate) struct SchedulerLogTransform {
    decl: TransformDecl,
    scheduler_log: String,
}

impl SchedulerLogTransform {
    pub(crate) fn boxed(scheduler_log: String) -> Result<Box<dyn BuildTransform>, SchedulerError> {
        let mut decl = TransformDecl::new("SchedulerLog");
        decl.set_output(TransformOutput::new(BuildPath::new(
            "[intermediate]/common/scheduler/log",
        )?));
        decl.set_dependency_mode(DependencyMode::IgnoreDependency);
        Ok(Box::new(SchedulerLogTransform {
            decl,
            scheduler_log,
        }))
    }
}

impl BuildTransform for SchedulerLogTransform {
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
        ctx.log(&self.scheduler_log);
        let output = self
            .decl
            .first_output_path()
            .cloned()
            .expect("scheduler log transform declares its output");
        ctx.store().write_data(&output, &[], WriteOptions::ASYNC_UPLOAD)?;
        Ok(TransformStatus::OutputsUpdated)
    }
}
