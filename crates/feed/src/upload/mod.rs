mod cloudinary;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatfeed_storage::BoxFuture;
use snafu::{Snafu, ensure};

pub use cloudinary::CloudinaryUploader;

use crate::notice::{Notice, NoticeBoard};

pub type UploadResult<T> = Result<T, UploadError>;

/// File picked by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type
            .trim()
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UploadError {
    #[snafu(display("only image files can be uploaded, got `{mime_type}`"))]
    NotAnImage {
        stage: &'static str,
        mime_type: String,
    },
    #[snafu(display("an upload is already in progress"))]
    UploadInProgress { stage: &'static str },
    #[snafu(display("upload request failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("upload endpoint returned status {status}: {body}"))]
    UploadStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("upload response has no secure_url"))]
    MissingSecureUrl { stage: &'static str },
    #[snafu(display("upload failed on `{stage}`: {message}"))]
    Service {
        stage: &'static str,
        message: String,
    },
}

/// CDN that stores a file and returns a publicly resolvable URL.
pub trait UploadService: Send + Sync {
    fn upload<'a>(&'a self, file: ImageFile) -> BoxFuture<'a, UploadResult<String>>;
}

/// Validation, single-flight and last-result bookkeeping around an [`UploadService`].
#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    service: Arc<dyn UploadService>,
    notices: Option<NoticeBoard>,
    in_flight: AtomicBool,
    last_url: Mutex<Option<String>>,
}

impl CoordinatorInner {
    fn report(&self, error: &UploadError) {
        if let Some(notices) = &self.notices {
            notices.raise(Notice::UploadFailed {
                message: error.to_string(),
            });
        }
    }

    fn lock_last_url(&self) -> MutexGuard<'_, Option<String>> {
        self.last_url.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UploadCoordinator {
    pub fn new(service: Arc<dyn UploadService>) -> Self {
        Self::build(service, None)
    }

    /// Failures and rejections are also raised on `notices`.
    pub fn with_notices(service: Arc<dyn UploadService>, notices: NoticeBoard) -> Self {
        Self::build(service, Some(notices))
    }

    fn build(service: Arc<dyn UploadService>, notices: Option<NoticeBoard>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                service,
                notices,
                in_flight: AtomicBool::new(false),
                last_url: Mutex::new(None),
            }),
        }
    }

    /// Validates `file` and claims the upload slot.
    ///
    /// Both checks happen before any network traffic; the slot is released when the
    /// returned upload finishes or is dropped.
    pub fn begin(&self, file: ImageFile) -> UploadResult<PendingUpload> {
        let pending = self.claim(file);
        if let Err(error) = &pending {
            self.inner.report(error);
        }
        pending
    }

    fn claim(&self, file: ImageFile) -> UploadResult<PendingUpload> {
        ensure!(
            file.is_image(),
            NotAnImageSnafu {
                stage: "validate-upload-file",
                mime_type: file.mime_type.clone(),
            }
        );

        let claimed = self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        ensure!(
            claimed,
            UploadInProgressSnafu {
                stage: "claim-upload-slot",
            }
        );

        Ok(PendingUpload {
            inner: Arc::clone(&self.inner),
            file: Some(file),
        })
    }

    pub async fn upload(&self, file: ImageFile) -> UploadResult<String> {
        self.begin(file)?.finish().await
    }

    pub fn is_uploading(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// URL of the most recent successful upload.
    pub fn last_url(&self) -> Option<String> {
        self.inner.lock_last_url().clone()
    }
}

/// An upload holding the coordinator's slot.
pub struct PendingUpload {
    inner: Arc<CoordinatorInner>,
    file: Option<ImageFile>,
}

impl PendingUpload {
    pub async fn finish(mut self) -> UploadResult<String> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                return ServiceSnafu {
                    stage: "take-pending-upload-file",
                    message: "upload already finished".to_string(),
                }
                .fail();
            }
        };

        let file_name = file.name.clone();
        let result = self.inner.service.upload(file).await;
        match &result {
            Ok(url) => {
                tracing::info!(file = %file_name, url = %url, "image uploaded");
                *self.inner.lock_last_url() = Some(url.clone());
            }
            Err(error) => {
                tracing::warn!(file = %file_name, error = %error, "image upload failed");
                self.inner.report(error);
            }
        }
        result
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
    }
}
