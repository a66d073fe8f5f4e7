//! GenerationService: transport-agnostic generation with admission control.
//!
//! This service owns:
//! - The shared AdmissionPool bounding concurrent provider calls
//! - The Generator performing the protected call
//! - Shutdown coordination
//!
//! Every provider call runs while holding a permit; the permit is dropped on
//! every exit path, including errors and caller cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::config::GateConfig;
use crate::generation::{GenerationError, GenerationOutput, GenerationRequest, Generator, Prompt};
use crate::health::{Health, HealthSnapshot};
use crate::permit::{AcquireError, AdmissionPool, Permit};
use crate::version::VersionInfo;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Admission(#[from] AcquireError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Transport-agnostic generation service.
pub struct GenerationService {
    pool: Arc<AdmissionPool>,
    generator: Arc<dyn Generator>,
    queue_timeout: Option<Duration>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl GenerationService {
    pub fn new(pool: Arc<AdmissionPool>, generator: Arc<dyn Generator>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let version = VersionInfo::new().with_model(generator.model());
        Self {
            pool,
            generator,
            queue_timeout: None,
            shutdown_tx,
            shutdown_rx,
            version,
        }
    }

    /// Build the pool from gate settings and apply its queue timeout.
    pub fn from_config(config: &GateConfig, generator: Arc<dyn Generator>) -> Self {
        Self::new(Arc::new(AdmissionPool::from_config(config)), generator)
            .with_queue_timeout(config.queue_timeout)
    }

    pub fn with_queue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &Arc<AdmissionPool> {
        &self.pool
    }

    pub fn health(&self) -> HealthSnapshot {
        let pool = self.pool.snapshot();
        HealthSnapshot {
            status: Health::from_pool(&pool, self.pool.is_closed()),
            pool,
            version: self.version.clone(),
        }
    }

    async fn admit(&self) -> Result<Permit, AcquireError> {
        match self.queue_timeout {
            Some(timeout) => self.pool.acquire_timeout(timeout).await,
            None => self.pool.acquire().await,
        }
    }

    /// Generate content for one request.
    ///
    /// Validation happens before queuing so malformed requests never occupy
    /// a slot or a queue position.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerateError> {
        request.validate()?;
        let prompt = Prompt::for_request(&request);
        let id = format!("gen_{}", uuid::Uuid::new_v4().simple());

        let queued_at = Instant::now();
        let permit = self.admit().await.inspect_err(|e| {
            tracing::warn!(generation_id = %id, error = %e, "Generation not admitted");
        })?;
        let queue_time = queued_at.elapsed();
        tracing::debug!(
            generation_id = %id,
            permit = permit.id(),
            kind = request.kind.as_str(),
            ?queue_time,
            "Generation admitted"
        );

        let started = Instant::now();
        let result = self.generator.generate(&prompt).await;
        drop(permit);
        let generation_time = started.elapsed();

        let completion = result.inspect_err(|e| {
            tracing::error!(generation_id = %id, error = %e, "Generation failed");
        })?;

        tracing::info!(
            generation_id = %id,
            kind = request.kind.as_str(),
            model = %completion.model,
            ?generation_time,
            "Generation completed"
        );

        Ok(GenerationOutput {
            id,
            kind: request.kind,
            content: completion.content,
            model: completion.model,
            usage: completion.usage,
            created_at: chrono::Utc::now().to_rfc3339(),
            queue_time,
            generation_time,
        })
    }

    /// Stop admitting generations. Queued requests fail with `Closed`;
    /// in-flight generations finish normally.
    pub fn trigger_shutdown(&self) {
        self.pool.close();
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}
