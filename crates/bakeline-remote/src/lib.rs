//! Execution substrates the scheduler can suspend on.
//!
//! A transform's own `evaluate` runs on the scheduler thread; real work is
//! dispatched to one of three substrates and polled for completion:
//!
//! - the **farm**, long-running remote jobs addressed by [`FarmJobId`];
//! - **SN-DBS**, short compiler-style distributed jobs addressed by a
//!   project name and job id string;
//! - the local [`ThreadPool`], in-process worker jobs addressed by
//!   [`WorkItemHandle`].
//!
//! The farm and SN-DBS transports are external collaborators; this crate
//! defines only the session interfaces the scheduler consumes, plus no-op
//! sessions for builds that never leave the local machine.

mod farm;
mod sndbs;
mod threadpool;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use farm::{FarmConfig, FarmJob, FarmJobId, FarmJobSpec, FarmSession, NullFarm};
pub use sndbs::{NullSnDbs, SnDbsJobResult, SnDbsJobStatus, SnDbsSession};
pub use threadpool::{JobPayload, ThreadPool, WorkItemHandle};
