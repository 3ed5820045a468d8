use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};

use chatfeed_storage::BoxFuture;

use super::{
    ImageFile, MissingSecureUrlSnafu, TransportSnafu, UploadResult, UploadService,
    UploadStatusSnafu,
};
use crate::settings::UploadSettings;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
}

/// Unsigned uploads through a Cloudinary upload preset.
#[derive(Clone)]
pub struct CloudinaryUploader {
    client: reqwest::Client,
    settings: UploadSettings,
}

impl CloudinaryUploader {
    pub fn new(settings: UploadSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(client: reqwest::Client, settings: UploadSettings) -> Self {
        Self { client, settings }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}/image/upload",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.cloud_name
        )
    }

    async fn send(&self, file: ImageFile) -> UploadResult<String> {
        let part = Part::bytes(file.bytes)
            .file_name(file.name)
            .mime_str(&file.mime_type)
            .context(TransportSnafu {
                stage: "build-upload-part",
            })?;

        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.settings.upload_preset.clone())
            .text("cloud_name", self.settings.cloud_name.clone())
            .text("folder", self.settings.folder.clone());

        let response = self
            .client
            .post(self.endpoint())
            .multipart(form)
            .send()
            .await
            .context(TransportSnafu {
                stage: "send-upload-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return UploadStatusSnafu {
                stage: "check-upload-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let payload = response
            .json::<UploadResponse>()
            .await
            .context(TransportSnafu {
                stage: "decode-upload-response",
            })?;

        payload
            .secure_url
            .filter(|url| !url.trim().is_empty())
            .context(MissingSecureUrlSnafu {
                stage: "read-secure-url",
            })
    }
}

impl UploadService for CloudinaryUploader {
    fn upload<'a>(&'a self, file: ImageFile) -> BoxFuture<'a, UploadResult<String>> {
        Box::pin(self.send(file))
    }
}
