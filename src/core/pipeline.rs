use crate::core::fetcher::{FetchFilters, PretixClient};
use crate::core::publisher::Publisher;
use crate::core::spreadsheet::SpreadsheetBuilder;
use crate::core::transform::Transformer;
use crate::domain::documents::DocumentSpec;
use crate::domain::model::{Document, PublishReport, RegistrationSet};
use crate::domain::ports::{Pipeline, Storage};
use crate::utils::error::Result;
use chrono::Utc;

/// pretix → spreadsheets → storage.
pub struct SyncPipeline<S: Storage> {
    client: PretixClient,
    filters: FetchFilters,
    transformer: Transformer,
    builder: SpreadsheetBuilder,
    publisher: Publisher<S>,
    documents: Vec<DocumentSpec>,
}

impl<S: Storage> SyncPipeline<S> {
    pub fn new(
        client: PretixClient,
        filters: FetchFilters,
        transformer: Transformer,
        builder: SpreadsheetBuilder,
        publisher: Publisher<S>,
        documents: Vec<DocumentSpec>,
    ) -> Self {
        Self {
            client,
            filters,
            transformer,
            builder,
            publisher,
            documents,
        }
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for SyncPipeline<S> {
    async fn extract(&self) -> Result<RegistrationSet> {
        tracing::debug!("Requesting registrations from {}", self.client.event_url());
        self.client.fetch_all(&self.filters).await
    }

    async fn transform(&self, data: &RegistrationSet) -> Result<Vec<Document>> {
        let rows = self.transformer.transform(data, &self.documents);
        tracing::debug!("Transformed {} registrations into {} documents", data.len(), rows.len());

        // 全部建好才回傳，任何一份失敗就不上傳
        rows.values().map(|r| self.builder.build(r)).collect()
    }

    async fn load(&self, documents: Vec<Document>) -> Result<PublishReport> {
        let mut report = self.publisher.publish_all(&documents).await?;
        let stamps = self.publisher.publish_stamps(Utc::now()).await?;
        report.files.extend(stamps.files);
        report.bytes_uploaded += stamps.bytes_uploaded;
        Ok(report)
    }

    async fn touch(&self) -> Result<PublishReport> {
        self.publisher.touch(Utc::now()).await
    }
}
