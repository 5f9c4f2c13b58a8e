mod compile;
mod context;
mod inflight;
mod queue;

pub use compile::{
    COMPILE_JOB_TYPE, CompileJobError, CompileJobPayload, process_compile_job, run_compile_job,
};
pub use context::{CompileWorkerContext, job_failed};
pub use inflight::{Claim, InFlightCompilations, InFlightGuard};
pub use queue::{CompileQueue, QueueError};
