use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use chatfeed_storage::DEFAULT_PAGE_SIZE;

pub const SETTINGS_DIRECTORY_NAME: &str = "chatfeed";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "feed.db";
pub const ENV_PREFIX: &str = "CHATFEED_";
pub const DEFAULT_UPLOAD_API_URL: &str = "https://api.cloudinary.com/v1_1";
pub const DEFAULT_UPLOAD_PRESET: &str = "upload_image";
pub const DEFAULT_UPLOAD_FOLDER: &str = "upload/images";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSettings {
    #[serde(default = "default_upload_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub cloud_name: String,
    #[serde(default = "default_upload_preset")]
    pub upload_preset: String,
    #[serde(default = "default_upload_folder")]
    pub folder: String,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            api_url: default_upload_api_url(),
            cloud_name: String::new(),
            upload_preset: default_upload_preset(),
            folder: default_upload_folder(),
        }
    }
}

impl UploadSettings {
    pub fn is_configured(&self) -> bool {
        !self.cloud_name.trim().is_empty()
    }

    fn normalized(mut self) -> Self {
        self.api_url = or_default(self.api_url, default_upload_api_url);
        self.cloud_name = self.cloud_name.trim().to_string();
        self.upload_preset = or_default(self.upload_preset, default_upload_preset);
        self.folder = or_default(self.folder, default_upload_folder);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub backfill_top_threshold_px: f64,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub upload: UploadSettings,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            backfill_top_threshold_px: 0.0,
            database_path: default_database_path(),
            upload: UploadSettings::default(),
        }
    }
}

impl FeedSettings {
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        if !self.backfill_top_threshold_px.is_finite() || self.backfill_top_threshold_px < 0.0 {
            self.backfill_top_threshold_px = 0.0;
        }
        self.database_path = or_default(self.database_path, default_database_path);
        self.upload = self.upload.normalized();
        self
    }
}

/// File-backed settings with lock-free reads.
pub struct SettingsStore {
    settings: Arc<ArcSwap<FeedSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".chatfeed"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<FeedSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: FeedSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Re-reads the file and environment, keeping the current value on failure.
    pub fn reload(&self) {
        self.settings
            .store(Arc::new(Self::load_from_disk(&self.config_path)));
    }

    fn load_from_disk(path: &Path) -> FeedSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        // A missing file reads as empty; environment overrides the file.
        let figment = Figment::from(Serialized::defaults(FeedSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<FeedSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                FeedSettings::default()
            }
        }
    }

    fn persist(&self, settings: &FeedSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn or_default(value: String, default: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default()
    } else {
        trimmed.to_string()
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_database_path() -> String {
    SettingsStore::default_config_dir()
        .join(DATABASE_FILE_NAME)
        .display()
        .to_string()
}

fn default_upload_api_url() -> String {
    DEFAULT_UPLOAD_API_URL.to_string()
}

fn default_upload_preset() -> String {
    DEFAULT_UPLOAD_PRESET.to_string()
}

fn default_upload_folder() -> String {
    DEFAULT_UPLOAD_FOLDER.to_string()
}
