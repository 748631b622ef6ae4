//! Upload adapter.
//!
//! Sends every available artifact to the model service and records the
//! result, keyed by absolute path. Artifacts are consumed: each one's scratch
//! directory is removed as soon as its upload settles.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::stream::{self, StreamExt};

use crate::models::{NormalizedArtifact, UploadMap, UploadedHandle};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::service::{with_retry, AiService, RetryPolicy};

pub async fn upload_all(
    service: &dyn AiService,
    artifacts: Vec<NormalizedArtifact>,
    retry: &RetryPolicy,
    workers: usize,
    progress: &dyn ProgressReporter,
) -> UploadMap {
    let total = artifacts.len() as u64;
    let done = AtomicU64::new(0);
    let done = &done;

    let handles: Vec<UploadedHandle> = stream::iter(artifacts)
        .map(|artifact| async move {
            let handle = upload_one(service, artifact, retry).await;
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            progress.report(ProgressEvent::Uploading { n, total });
            handle
        })
        .buffered(workers.max(1))
        .collect()
        .await;

    handles
        .into_iter()
        .map(|h| (h.source.absolute_path.clone(), h))
        .collect()
}

async fn upload_one(
    service: &dyn AiService,
    artifact: NormalizedArtifact,
    retry: &RetryPolicy,
) -> UploadedHandle {
    let mut handle = UploadedHandle {
        source: artifact.source.clone(),
        canonical_form: artifact.canonical_form,
        remote_handle: None,
        failure: artifact.failure.clone(),
    };

    let (Some(path), Some(mime)) = (&artifact.local_path, artifact.canonical_form.mime_type())
    else {
        return handle;
    };
    let display_name = artifact.source.relative_path.as_str();

    match with_retry(retry, display_name, move || service.upload(path, mime, display_name)).await {
        Ok(remote) => {
            tracing::info!(file = %display_name, uri = %remote.uri, "uploaded");
            handle.remote_handle = Some(remote);
        }
        Err(e) => {
            tracing::warn!(file = %display_name, error = %e, "upload failed");
            handle.failure = Some(format!("upload failed: {}", e));
        }
    }
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::models::{CanonicalForm, PromptDocument, RemoteHandle, ScannedFile};
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    /// Rejects any path whose file name starts with `bad`.
    struct FakeService;

    #[async_trait]
    impl AiService for FakeService {
        fn model(&self) -> &str {
            "fake"
        }

        async fn upload(
            &self,
            path: &Path,
            mime_type: &str,
            display_name: &str,
        ) -> Result<RemoteHandle, ServiceError> {
            let name = path.file_name().unwrap().to_string_lossy();
            if name.starts_with("bad") {
                return Err(ServiceError::Status {
                    status: 400,
                    body: "rejected".into(),
                });
            }
            Ok(RemoteHandle {
                name: format!("files/{}", display_name),
                uri: format!("fake://{}", display_name),
                mime_type: mime_type.to_string(),
            })
        }

        async fn complete(&self, _prompt: &PromptDocument) -> Result<String, ServiceError> {
            unreachable!("upload tests never complete")
        }
    }

    fn scanned(rel: &str, ext: &str) -> ScannedFile {
        ScannedFile {
            relative_path: rel.to_string(),
            absolute_path: PathBuf::from("/in").join(rel),
            extension: ext.to_string(),
        }
    }

    #[tokio::test]
    async fn every_artifact_gets_an_entry_in_order() {
        let artifacts = vec![
            NormalizedArtifact::passthrough(scanned("z.pdf", ".pdf"), CanonicalForm::Pdf),
            NormalizedArtifact::unsupported(scanned("notes.txt", ".txt")),
            NormalizedArtifact::passthrough(scanned("bad.pdf", ".pdf"), CanonicalForm::Pdf),
            NormalizedArtifact::failed(scanned("m.stp", ".stp"), CanonicalForm::Png, "timed out"),
        ];

        let map = upload_all(&FakeService, artifacts, &RetryPolicy::none(), 2, &NoProgress).await;
        let keys: Vec<&Path> = map.keys().map(PathBuf::as_path).collect();
        assert_eq!(
            keys,
            vec![
                Path::new("/in/z.pdf"),
                Path::new("/in/notes.txt"),
                Path::new("/in/bad.pdf"),
                Path::new("/in/m.stp"),
            ]
        );

        let ok = &map[Path::new("/in/z.pdf")];
        assert_eq!(ok.remote_handle.as_ref().unwrap().mime_type, "application/pdf");
        assert!(ok.failure.is_none());

        assert!(map[Path::new("/in/notes.txt")].remote_handle.is_none());
        let bad = &map[Path::new("/in/bad.pdf")];
        assert!(bad.failure.as_ref().unwrap().starts_with("upload failed"));
        assert_eq!(map[Path::new("/in/m.stp")].failure.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn files_sharing_a_display_path_keep_separate_entries() {
        let mut first = scanned("a\u{fffd}.pdf", ".pdf");
        first.absolute_path = PathBuf::from("/in/first.pdf");
        let mut second = scanned("a\u{fffd}.pdf", ".pdf");
        second.absolute_path = PathBuf::from("/in/second.pdf");
        let artifacts = vec![
            NormalizedArtifact::passthrough(first, CanonicalForm::Pdf),
            NormalizedArtifact::passthrough(second, CanonicalForm::Pdf),
        ];

        let map = upload_all(&FakeService, artifacts, &RetryPolicy::none(), 2, &NoProgress).await;
        assert_eq!(map.len(), 2);
        assert!(map.values().all(|h| h.remote_handle.is_some()));
    }
}
