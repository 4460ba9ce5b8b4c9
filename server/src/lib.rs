//! OTS server side - dispatches the tasks of a test run to a device group,
//! follows them to completion under escalating deadlines, and judges the
//! results the workers streamed back.

pub mod backend;
pub mod config;
pub mod error;
pub mod execution;
pub mod judge;
pub mod runner;
pub mod task;
pub mod testrun;
pub mod timeout;
pub mod walker;

pub use backend::{BackendDispatcher, BackendError, CaseResult, LogBackend, ResultBackend};
pub use config::ServerConfig;
pub use error::{ConfigError, RunnerError};
pub use execution::{execute_testrun, TestRunRequest};
pub use judge::{qualified_package, Judgement, ResultJudge};
pub use runner::{ResponseHandler, RunnerConfig, TaskRunner};
pub use task::{Task, TaskState};
pub use testrun::{PackageMap, TestRun, Verdict};
pub use timeout::{Expiry, TimeoutController, TimeoutState};
pub use walker::{JsonResultWalker, ResultWalker, WalkError};
