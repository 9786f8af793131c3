// Job Scheduler - central scheduler for all background jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::{InactivityScanJob, SequenceRunnerJob};
use crate::automation::{AutomationEngine, AutomationStore, SequenceManager, StoreError};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Storage error: {0}")]
    StorageError(#[from] StoreError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// How often the sequence runner scans for due delayed steps.
    pub sequence_runner_interval_minutes: u32,
    /// Max pending entries picked up per scan.
    pub runner_batch_size: i64,

    // Inactivity scan
    pub inactivity_scan_interval_hours: u32,
    pub inactivity_idle_days: i64,
    /// Phases excluded from inactivity events.
    pub terminal_phases: Vec<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            // Delayed steps - check every minute
            sequence_runner_interval_minutes: 1,
            runner_batch_size: 100,

            // Inactivity - check every 6 hours
            inactivity_scan_interval_hours: 6,
            inactivity_idle_days: 14,
            terminal_phases: vec!["hired".to_string(), "closed_lost".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    store: Arc<dyn AutomationStore>,
    manager: Arc<SequenceManager>,
    engine: AutomationEngine,
    config: JobConfig,
    execution_logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl JobScheduler {
    pub async fn new(
        store: Arc<dyn AutomationStore>,
        manager: Arc<SequenceManager>,
        engine: AutomationEngine,
        config: JobConfig,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            store,
            manager,
            engine,
            config,
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_sequence_runner().await?;
        self.schedule_inactivity_scan().await?;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.clone().shutdown().await?;
        Ok(())
    }

    async fn schedule_sequence_runner(&self) -> JobResult<()> {
        let interval = self.config.sequence_runner_interval_minutes;
        let cron_expr = format!("0 */{} * * * *", interval); // Every N minutes

        let store = self.store.clone();
        let manager = self.manager.clone();
        let batch_size = self.config.runner_batch_size;
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let store = store.clone();
            let manager = manager.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();

                let runner = SequenceRunnerJob::new(store, manager, batch_size);

                match runner.run().await {
                    Ok(result) => {
                        record_run(
                            &logs,
                            "Sequence Runner",
                            started_at,
                            result.entries_due,
                            result.errors,
                        )
                        .await;
                    }
                    Err(e) => {
                        error!("Sequence runner failed: {}", e);
                    }
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled sequence runner to run every {} minute(s)", interval);

        Ok(())
    }

    async fn schedule_inactivity_scan(&self) -> JobResult<()> {
        let interval = self.config.inactivity_scan_interval_hours;
        let cron_expr = format!("0 0 */{} * * *", interval); // Every N hours

        let store = self.store.clone();
        let engine = self.engine.clone();
        let idle_days = self.config.inactivity_idle_days;
        let terminal_phases = self.config.terminal_phases.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let store = store.clone();
            let engine = engine.clone();
            let terminal_phases = terminal_phases.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();

                let scan = InactivityScanJob::new(store, engine, idle_days, terminal_phases);

                match scan.run().await {
                    Ok(result) => {
                        record_run(
                            &logs,
                            "Inactivity Scan",
                            started_at,
                            result.entities_scanned,
                            Vec::new(),
                        )
                        .await;
                    }
                    Err(e) => {
                        error!("Inactivity scan failed: {}", e);
                    }
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled inactivity scan to run every {} hour(s)", interval);

        Ok(())
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }

    pub async fn run_job_now(&self, job_name: &str) -> JobResult<()> {
        match job_name {
            "sequence_runner" => {
                let runner = SequenceRunnerJob::new(
                    self.store.clone(),
                    self.manager.clone(),
                    self.config.runner_batch_size,
                );
                runner.run().await?;
            }
            "inactivity_scan" => {
                let scan = InactivityScanJob::new(
                    self.store.clone(),
                    self.engine.clone(),
                    self.config.inactivity_idle_days,
                    self.config.terminal_phases.clone(),
                );
                scan.run().await?;
            }
            _ => return Err(JobError::ConfigError(format!("Unknown job: {}", job_name))),
        }

        Ok(())
    }
}

async fn record_run(
    logs: &Arc<RwLock<Vec<JobExecutionLog>>>,
    job_name: &str,
    started_at: DateTime<Utc>,
    items_processed: i32,
    errors: Vec<String>,
) {
    let completed_at = Utc::now();
    let duration = (completed_at - started_at).num_milliseconds();

    let log = JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: job_name.to_string(),
        started_at,
        completed_at: Some(completed_at),
        status: if errors.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::PartialFailure
        },
        items_processed,
        errors,
        duration_ms: Some(duration),
    };

    let mut logs = logs.write().await;
    logs.push(log);
    // Keep only last 100 logs
    if logs.len() > 100 {
        logs.remove(0);
    }
}
