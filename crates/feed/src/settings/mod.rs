pub mod state;

pub use state::{FeedSettings, SettingsError, SettingsStore, UploadSettings};
