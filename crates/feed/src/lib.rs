pub mod chat;
pub mod error;
pub mod notice;
pub mod profile;
pub mod session;
pub mod settings;
pub mod upload;

pub use chat::{
    AnchorHint, BackfillOutcome, ChangeKind, ChatRoom, ChatServices, Composer, FeedChange,
    FeedEvent, FeedStatus, FeedSynchronizer, KeyOutcome, KeyPress, Message, MessageView,
    ScrollCommand, ScrollMetrics, ViewportController,
};
pub use error::{FeedError, FeedResult};
pub use notice::{Notice, NoticeBoard};
pub use profile::{InMemoryProfileDirectory, ProfileDirectory, ProfileForm, UserProfile};
pub use session::{FixedSession, SessionContext};
pub use settings::{FeedSettings, SettingsError, SettingsStore, UploadSettings};
pub use upload::{CloudinaryUploader, ImageFile, PendingUpload, UploadCoordinator, UploadError, UploadService};
