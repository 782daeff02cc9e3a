use crate::domain::model::{Document, PublishReport, RegistrationSet};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Remote (or local) file store the publisher writes to.
///
/// Paths are `/`-separated and relative to the store root.
pub trait Storage: Send + Sync {
    /// Creates `path` and any missing parents. Existing directories are fine.
    fn create_dir_all(&self, path: &str) -> impl std::future::Future<Output = Result<()>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    /// Replaces `to` with `from`, overwriting any existing file.
    fn rename(&self, from: &str, to: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<RegistrationSet>;
    async fn transform(&self, data: &RegistrationSet) -> Result<Vec<Document>>;
    async fn load(&self, documents: Vec<Document>) -> Result<PublishReport>;
    /// Refreshes the "last updated" marker without re-uploading documents.
    async fn touch(&self) -> Result<PublishReport>;
}

/// Monotonic time source for the scheduler.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
