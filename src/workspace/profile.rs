use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Result, Workspace};
use crate::error::ValidationError;
use crate::store::keys;
use crate::upload::{FileUpload, UploadPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub role: String,
    /// `data:` URL of the uploaded picture.
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "Community worker".to_string(),
            role: "Community administrator".to_string(),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub role: Option<String>,
}

impl Workspace {
    pub async fn profile(&self) -> Result<Profile> {
        Ok(self
            .store
            .get_json(keys::USER_PROFILE)
            .await?
            .unwrap_or_default())
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        let non_blank = |value: Option<String>| -> Result<Option<String>> {
            match value {
                Some(v) if v.trim().is_empty() => Err(ValidationError::EmptyInput.into()),
                Some(v) => Ok(Some(v.trim().to_string())),
                None => Ok(None),
            }
        };
        let name = non_blank(update.name)?;
        let role = non_blank(update.role)?;

        self.modify_profile(|profile| {
            if let Some(name) = name {
                profile.name = name;
            }
            if let Some(role) = role {
                profile.role = role;
            }
        })
        .await
    }

    /// Store a new profile picture inline as a base64 `data:` URL.
    pub async fn set_avatar(&self, file: &FileUpload) -> Result<Profile> {
        UploadPolicy::avatar().check(file)?;

        let url = format!("data:{};base64,{}", file.mime, STANDARD.encode(&file.bytes));
        let profile = self.modify_profile(|profile| profile.avatar = Some(url)).await?;
        info!("Updated avatar ({} bytes)", file.size());
        Ok(profile)
    }

    async fn modify_profile(&self, change: impl FnOnce(&mut Profile)) -> Result<Profile> {
        let _guard = self.writes.lock().await;
        let mut profile = self.profile().await?;
        change(&mut profile);
        self.store.put_json(keys::USER_PROFILE, &profile).await?;
        Ok(profile)
    }
}
