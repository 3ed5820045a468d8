//! Participant profiles and the edit-profile form.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chatfeed_storage::UserId;
use snafu::{Snafu, ensure};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub uid: UserId,
    pub display_name: String,
    pub photo_url: String,
}

/// Reactive, read-only profile lookup.
pub trait ProfileDirectory: Send + Sync {
    /// Yields `None` until the profile exists.
    fn watch_profile(&self, uid: &UserId) -> watch::Receiver<Option<UserProfile>>;
}

#[derive(Default)]
pub struct InMemoryProfileDirectory {
    entries: Mutex<HashMap<UserId, watch::Sender<Option<UserProfile>>>>,
}

impl InMemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: UserProfile) {
        let mut entries = self.lock();
        match entries.get(&profile.uid) {
            Some(sender) => {
                sender.send_replace(Some(profile));
            }
            None => {
                let uid = profile.uid.clone();
                let (sender, _) = watch::channel(Some(profile));
                entries.insert(uid, sender);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, watch::Sender<Option<UserProfile>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProfileDirectory for InMemoryProfileDirectory {
    fn watch_profile(&self, uid: &UserId) -> watch::Receiver<Option<UserProfile>> {
        self.lock()
            .entry(uid.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}

/// Validated changes ready for the profile store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: String,
    pub photo_url: String,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProfileFormError {
    #[snafu(display("display name must not be empty"))]
    EmptyDisplayName { stage: &'static str },
    #[snafu(display("a profile photo is required"))]
    MissingPhoto { stage: &'static str },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileForm {
    pub display_name: String,
    pub photo_url: String,
}

impl ProfileForm {
    pub fn from_profile(profile: Option<&UserProfile>) -> Self {
        let mut form = Self::default();
        form.reset(profile);
        form
    }

    /// Discards edits and reloads the stored values.
    pub fn reset(&mut self, current: Option<&UserProfile>) {
        match current {
            Some(profile) => {
                self.display_name = profile.display_name.clone();
                self.photo_url = profile.photo_url.clone();
            }
            None => *self = Self::default(),
        }
    }

    pub fn set_display_name(&mut self, value: impl Into<String>) {
        self.display_name = value.into();
    }

    pub fn apply_uploaded_photo(&mut self, url: impl Into<String>) {
        self.photo_url = url.into();
    }

    pub fn validate(&self) -> Result<ProfileUpdate, ProfileFormError> {
        let display_name = self.display_name.trim();
        ensure!(
            !display_name.is_empty(),
            EmptyDisplayNameSnafu {
                stage: "validate-profile-display-name",
            }
        );
        let photo_url = self.photo_url.trim();
        ensure!(
            !photo_url.is_empty(),
            MissingPhotoSnafu {
                stage: "validate-profile-photo",
            }
        );

        Ok(ProfileUpdate {
            display_name: display_name.to_string(),
            photo_url: photo_url.to_string(),
        })
    }
}
