// Background Jobs Service
//
// Scheduled background jobs for the Carepath pipeline, run with
// tokio-cron-scheduler at configurable intervals. The sequence runner is
// the consumer of the delayed-step contract: it scans due pending log
// entries and hands them back to the enrollment manager.

pub mod scheduler;
pub mod sequence_runner;

pub use scheduler::{JobConfig, JobError, JobResult, JobScheduler};
pub use sequence_runner::{InactivityScanJob, SequenceRunnerJob};
