use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local, Utc};
use lumen_core::{NamingScheme, OutputWriter, Prediction, Predictor};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info};

use crate::error::ApiError;
use crate::publish::OutputSink;
use crate::schema::{Health, HealthResponse, PredictionStatus, SetupInfo};
use crate::shutdown::ShutdownEvent;

enum Setup {
    Starting,
    Ready(Predictor),
    Failed(String),
}

struct SetupRecord {
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    setup: Setup,
}

/// Shared by every handler: the model once it is loaded, the worker slots and
/// the shutdown flag.
pub struct AppState {
    setup: RwLock<SetupRecord>,
    workers: Arc<Semaphore>,
    shutdown: ShutdownEvent,
    outputs: OutputSink,
    http: reqwest::Client,
}

impl AppState {
    pub fn new(
        threads: usize,
        shutdown: ShutdownEvent,
        outputs: OutputSink,
        http: reqwest::Client,
    ) -> Self {
        Self {
            setup: RwLock::new(SetupRecord {
                started_at: Utc::now(),
                completed_at: None,
                setup: Setup::Starting,
            }),
            workers: Arc::new(Semaphore::new(threads.max(1))),
            shutdown,
            outputs,
            http,
        }
    }

    /// Records the outcome of loading the model. Called once from the setup task.
    pub fn finish_setup(&self, result: anyhow::Result<Predictor>) {
        let mut record = self.setup.write().unwrap_or_else(PoisonError::into_inner);
        record.completed_at = Some(Utc::now());
        record.setup = match result {
            Ok(predictor) => {
                info!("setup succeeded");
                Setup::Ready(predictor)
            }
            Err(e) => {
                error!("setup failed: {:#}", e);
                Setup::Failed(format!("{e:#}"))
            }
        };
    }

    pub fn predictor(&self) -> Result<Predictor, ApiError> {
        let record = self.setup.read().unwrap_or_else(PoisonError::into_inner);
        match &record.setup {
            Setup::Starting => Err(ApiError::NotReady),
            Setup::Ready(predictor) => Ok(predictor.clone()),
            Setup::Failed(e) => Err(ApiError::SetupFailed(e.clone())),
        }
    }

    /// Takes a worker slot without waiting.
    pub fn try_acquire_worker(&self) -> Result<OwnedSemaphorePermit, ApiError> {
        self.workers
            .clone()
            .try_acquire_owned()
            .map_err(|_| ApiError::Busy)
    }

    pub fn health(&self) -> HealthResponse {
        let record = self.setup.read().unwrap_or_else(PoisonError::into_inner);
        let (status, setup_status, logs) = match &record.setup {
            Setup::Starting => (Health::Starting, None, String::new()),
            Setup::Ready(_) => {
                let health = if self.workers.available_permits() == 0 {
                    Health::Busy
                } else {
                    Health::Ready
                };
                (health, Some(PredictionStatus::Succeeded), String::new())
            }
            Setup::Failed(e) => (
                Health::SetupFailed,
                Some(PredictionStatus::Failed),
                e.clone(),
            ),
        };
        HealthResponse {
            status,
            setup: SetupInfo {
                started_at: record.started_at,
                completed_at: record.completed_at,
                status: setup_status,
                logs,
            },
        }
    }

    /// File name an output is uploaded under.
    pub fn output_name(&self, prediction: &Prediction) -> String {
        OutputWriter::new(".", NamingScheme::Timestamp).file_name(&prediction.request, Local::now())
    }

    pub fn outputs(&self) -> &OutputSink {
        &self.outputs
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn shutdown(&self) -> &ShutdownEvent {
        &self.shutdown
    }
}
