use crate::core::scheduler::RunPipeline;
use crate::domain::model::{RegistrationSet, RunResult, RunStatus};
use crate::domain::ports::Pipeline;
use crate::utils::error::{EtlError, Stage};
use async_trait::async_trait;
use std::time::Instant;
use tracing::Instrument;

type StageResult<T> = std::result::Result<T, (Stage, EtlError)>;

/// Runs fetch → transform → publish once per call and turns the outcome
/// into a [`RunResult`]. Nothing is published when an earlier stage fails.
pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    skip_unchanged: bool,
    last_published: Option<RegistrationSet>,
    runs: u64,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P, skip_unchanged: bool) -> Self {
        Self {
            pipeline,
            skip_unchanged,
            last_published: None,
            runs: 0,
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&mut self) -> RunResult {
        self.runs += 1;
        let run_id = self.runs;
        let started = Instant::now();
        let mut result = RunResult::new(run_id);

        let span = tracing::info_span!("run", run_id);
        match self.execute(&mut result).instrument(span).await {
            Ok(status) => result.status = status,
            Err((stage, err)) => {
                tracing::error!(
                    run_id,
                    stage = %stage,
                    retryable = err.is_retryable(),
                    "❌ Run failed during {}: {}",
                    stage,
                    err.user_friendly_message()
                );
                tracing::info!("💡 {}", err.recovery_suggestion());
                result.fail(stage, &err);
            }
        }
        result.duration = started.elapsed();

        if result.is_success() {
            tracing::info!(
                "✅ Run {} finished ({:?}) in {:.1}s: {} registrations, {} documents, {} bytes",
                run_id,
                result.status,
                result.duration.as_secs_f64(),
                result.registrations_fetched,
                result.rows_per_document.len(),
                result.bytes_uploaded
            );
        }
        result
    }

    async fn execute(&mut self, result: &mut RunResult) -> StageResult<RunStatus> {
        tracing::info!("📥 Fetching registrations");
        let registrations = self
            .pipeline
            .extract()
            .await
            .map_err(|e| (Stage::Fetch, e))?;
        result.registrations_fetched = registrations.len();
        tracing::info!("📥 Fetched {} registrations", registrations.len());

        if self.skip_unchanged && self.last_published.as_ref() == Some(&registrations) {
            tracing::info!("⏭️ Registrations unchanged since last upload, refreshing stamp only");
            let report = self
                .pipeline
                .touch()
                .await
                .map_err(|e| (Stage::Publish, e))?;
            result.bytes_uploaded = report.bytes_uploaded;
            return Ok(RunStatus::Unchanged);
        }

        tracing::info!("🔄 Building documents");
        let documents = self
            .pipeline
            .transform(&registrations)
            .await
            .map_err(|e| {
                let stage = match &e {
                    EtlError::BuildError { .. } | EtlError::ZipError(_) => Stage::Build,
                    _ => Stage::Transform,
                };
                (stage, e)
            })?;
        for document in &documents {
            let key = match &document.subdir {
                Some(subdir) => format!("{}/{}", subdir, document.file_name),
                None => document.file_name.clone(),
            };
            result.rows_per_document.insert(key, document.row_count);
        }

        tracing::info!("📤 Publishing {} documents", documents.len());
        let report = self
            .pipeline
            .load(documents)
            .await
            .map_err(|e| (Stage::Publish, e))?;
        result.bytes_uploaded = report.bytes_uploaded;

        self.last_published = Some(registrations);
        Ok(RunStatus::Success)
    }
}

#[async_trait]
impl<P: Pipeline> RunPipeline for EtlEngine<P> {
    async fn run(&mut self) -> RunResult {
        EtlEngine::run(self).await
    }
}
