use crate::domain::model::{Document, PublishReport};
use crate::domain::ports::Storage;
use crate::utils::error::{EtlError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Names and content of the marker files written next to the documents.
#[derive(Debug, Clone)]
pub struct StampSettings {
    /// Empty disables the stamp.
    pub last_updated_name: String,
    pub version_name: String,
    pub docker_image: Option<String>,
}

impl Default for StampSettings {
    fn default() -> Self {
        Self {
            last_updated_name: "Last_Updated.txt".to_string(),
            version_name: "Version.txt".to_string(),
            docker_image: None,
        }
    }
}

/// Joins `/`-separated path parts, ignoring empty parts and stray slashes.
pub fn join_remote(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn has_parent_segment(path: &str) -> bool {
    path.split(&['/', '\\'][..]).any(|segment| segment == "..")
}

pub struct Publisher<S: Storage> {
    storage: S,
    upload_dir: String,
    timezone: Tz,
    stamps: StampSettings,
}

impl<S: Storage> Publisher<S> {
    pub fn new(storage: S, upload_dir: &str, timezone: Tz, stamps: StampSettings) -> Self {
        Self {
            storage,
            upload_dir: join_remote(&[upload_dir]),
            timezone,
            stamps,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn target_dir(&self, subdir: Option<&str>) -> String {
        join_remote(&[&self.upload_dir, subdir.unwrap_or("")])
    }

    /// Uploads one document under a temporary name and moves it into place.
    pub async fn publish(&self, document: &Document) -> Result<usize> {
        let dir = self.target_dir(document.subdir.as_deref());
        self.put_atomic(&dir, &document.file_name, &document.bytes)
            .await?;
        tracing::info!(
            "📤 Published {} ({} rows, {} bytes)",
            join_remote(&[&dir, &document.file_name]),
            document.row_count,
            document.bytes.len()
        );
        Ok(document.bytes.len())
    }

    /// Sequential; stops at the first failing document.
    pub async fn publish_all(&self, documents: &[Document]) -> Result<PublishReport> {
        let mut report = PublishReport::default();
        for document in documents {
            let bytes = self.publish(document).await?;
            report.files.push(join_remote(&[
                document.subdir.as_deref().unwrap_or(""),
                &document.file_name,
            ]));
            report.bytes_uploaded += bytes;
        }
        Ok(report)
    }

    /// Writes the last-updated and version markers.
    pub async fn publish_stamps(&self, now: DateTime<Utc>) -> Result<PublishReport> {
        let mut report = self.touch(now).await?;
        if !self.stamps.version_name.is_empty() {
            let content = self.version_text();
            self.put_atomic(&self.upload_dir, &self.stamps.version_name, content.as_bytes())
                .await?;
            report.files.push(self.stamps.version_name.clone());
            report.bytes_uploaded += content.len();
        }
        Ok(report)
    }

    /// Refreshes only the last-updated marker.
    pub async fn touch(&self, now: DateTime<Utc>) -> Result<PublishReport> {
        let mut report = PublishReport::default();
        if self.stamps.last_updated_name.is_empty() {
            return Ok(report);
        }
        let content = self.last_updated_text(now);
        self.put_atomic(
            &self.upload_dir,
            &self.stamps.last_updated_name,
            content.as_bytes(),
        )
        .await?;
        tracing::debug!("Refreshed {}", self.stamps.last_updated_name);
        report.files.push(self.stamps.last_updated_name.clone());
        report.bytes_uploaded += content.len();
        Ok(report)
    }

    pub fn last_updated_text(&self, now: DateTime<Utc>) -> String {
        format!(
            "Last updated:\n{}",
            now.with_timezone(&self.timezone).format("%d.%m.%Y %H:%M")
        )
    }

    pub fn version_text(&self) -> String {
        match &self.stamps.docker_image {
            Some(image) if !image.is_empty() => {
                format!("regsync {}\n{}", env!("CARGO_PKG_VERSION"), image)
            }
            _ => format!("regsync {}", env!("CARGO_PKG_VERSION")),
        }
    }

    async fn put_atomic(&self, dir: &str, file_name: &str, data: &[u8]) -> Result<()> {
        let target = join_remote(&[dir, file_name]);
        if has_parent_segment(dir) || has_parent_segment(file_name) || file_name.contains('/') {
            return Err(EtlError::UploadError {
                path: target,
                status: None,
                retryable: false,
                message: "path must not contain '..' segments or nested names".to_string(),
            });
        }

        self.storage.create_dir_all(dir).await?;
        let temp = join_remote(&[dir, &format!(".{}.uploading", file_name)]);
        tracing::debug!("Uploading {} bytes to {}", data.len(), temp);
        self.storage.write_file(&temp, data).await?;
        self.storage.rename(&temp, &target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Records every storage call.
    #[derive(Default)]
    struct RecordingStorage {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingStorage {
        fn record(&self, call: String) -> Result<()> {
            let failing = self
                .fail_on
                .as_ref()
                .map(|f| call.contains(f.as_str()))
                .unwrap_or(false);
            self.calls.lock().unwrap().push(call.clone());
            if failing {
                return Err(EtlError::UploadError {
                    path: call,
                    status: Some(503),
                    retryable: true,
                    message: "unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    impl Storage for RecordingStorage {
        async fn create_dir_all(&self, path: &str) -> Result<()> {
            self.record(format!("mkdir {}", path))
        }

        async fn write_file(&self, path: &str, _data: &[u8]) -> Result<()> {
            self.record(format!("put {}", path))
        }

        async fn rename(&self, from: &str, to: &str) -> Result<()> {
            self.record(format!("move {} {}", from, to))
        }
    }

    fn document(name: &str, subdir: Option<&str>) -> Document {
        Document {
            file_name: format!("{}.xlsx", name),
            subdir: subdir.map(str::to_string),
            bytes: vec![1, 2, 3],
            row_count: 1,
        }
    }

    fn publisher(storage: RecordingStorage) -> Publisher<RecordingStorage> {
        Publisher::new(
            storage,
            "/Events/Summer/",
            chrono_tz::Europe::Berlin,
            StampSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_publish_uses_temporary_name_then_move() {
        let publisher = publisher(RecordingStorage::default());
        publisher
            .publish(&document("Paid", Some("Groups")))
            .await
            .unwrap();

        let calls = publisher.storage().calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "mkdir Events/Summer/Groups",
                "put Events/Summer/Groups/.Paid.xlsx.uploading",
                "move Events/Summer/Groups/.Paid.xlsx.uploading Events/Summer/Groups/Paid.xlsx",
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_all_stops_at_first_failure() {
        let storage = RecordingStorage {
            fail_on: Some("put Events/Summer/.B.xlsx".to_string()),
            ..Default::default()
        };
        let publisher = publisher(storage);
        let err = publisher
            .publish_all(&[document("A", None), document("B", None), document("C", None)])
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let calls = publisher.storage().calls.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| c.contains("C.xlsx")));
    }

    #[tokio::test]
    async fn test_parent_segments_are_rejected() {
        let publisher = publisher(RecordingStorage::default());
        let err = publisher
            .publish(&document("x", Some("../outside")))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::UploadError { retryable: false, .. }));
        assert!(publisher.storage().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stamps() {
        let publisher = publisher(RecordingStorage::default());
        let now = Utc.with_ymd_and_hms(2025, 1, 5, 8, 7, 0).unwrap();
        assert_eq!(publisher.last_updated_text(now), "Last updated:\n05.01.2025 09:07");

        let report = publisher.publish_stamps(now).await.unwrap();
        assert_eq!(report.files, vec!["Last_Updated.txt", "Version.txt"]);
        assert!(publisher.version_text().starts_with("regsync "));
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote(&["/a/", "", "b//c", "d.xlsx"]), "a/b/c/d.xlsx");
        assert_eq!(join_remote(&["", ""]), "");
    }
}
