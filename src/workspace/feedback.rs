use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Result, Workspace};
use crate::error::ValidationError;
use crate::id::new_id;
use crate::store::keys;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    #[default]
    Feature,
    Bug,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    Pending,
    Resolved,
}

/// A suggestion or bug report left through the suggestion box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub content: String,
    pub status: FeedbackStatus,
    pub date: DateTime<Utc>,
}

impl Workspace {
    pub async fn feedback(&self) -> Result<Vec<Feedback>> {
        Ok(self.store.get_list(keys::SUGGESTIONS).await?)
    }

    pub async fn submit_feedback(&self, kind: FeedbackKind, content: &str) -> Result<Feedback> {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }

        let entry = Feedback {
            id: new_id(),
            kind,
            content: content.to_string(),
            status: FeedbackStatus::Pending,
            date: Utc::now(),
        };

        let _guard = self.writes.lock().await;
        let stored = entry.clone();
        self.store
            .update_list(keys::SUGGESTIONS, move |list: &mut Vec<Feedback>| {
                list.push(stored)
            })
            .await?;

        info!("Recorded {:?} feedback {}", entry.kind, entry.id);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{RecordError, ValidationError};
    use crate::workspace::temp_workspace;

    use super::*;

    #[tokio::test]
    async fn feedback_is_appended_as_pending() {
        let (_dir, ws) = temp_workspace().await;
        ws.submit_feedback(FeedbackKind::Bug, "Upload button does nothing")
            .await
            .unwrap();
        ws.submit_feedback(FeedbackKind::Feature, "Dark mode").await.unwrap();

        let list = ws.feedback().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].kind, FeedbackKind::Bug);
        assert_eq!(list[1].content, "Dark mode");
        assert!(list.iter().all(|f| f.status == FeedbackStatus::Pending));
    }

    #[tokio::test]
    async fn blank_feedback_is_rejected() {
        let (_dir, ws) = temp_workspace().await;
        let err = ws.submit_feedback(FeedbackKind::Other, " \n").await.unwrap_err();
        assert!(matches!(
            err,
            RecordError::Validation(ValidationError::EmptyInput)
        ));
        assert!(ws.feedback().await.unwrap().is_empty());
    }

    #[test]
    fn kind_serializes_under_type() {
        let json = serde_json::to_value(Feedback {
            id: "1".into(),
            kind: FeedbackKind::Bug,
            content: "x".into(),
            status: FeedbackStatus::Pending,
            date: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "bug");
        assert_eq!(json["status"], "pending");
    }
}
