use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Result, Workspace};
use crate::error::{RecordError, ValidationError};
use crate::id::new_id;
use crate::store::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Draft,
    Pending,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub status: ReviewStatus,
    pub category: String,
    pub owner: String,
    #[serde(rename = "isShared")]
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Items not shared with others.
    Personal,
    Shared,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KnowledgeFilter {
    pub category: Option<String>,
    pub scope: Option<Scope>,
    /// Substring of the title or content.
    #[serde(rename = "q")]
    pub query: Option<String>,
}

impl KnowledgeFilter {
    fn matches(&self, item: &KnowledgeItem) -> bool {
        let category = self
            .category
            .as_deref()
            .map_or(true, |c| c.is_empty() || item.category == c);
        let scope = match self.scope {
            None => true,
            Some(Scope::Shared) => item.shared,
            Some(Scope::Personal) => !item.shared,
        };
        let query = self
            .query
            .as_deref()
            .map_or(true, |q| item.title.contains(q) || item.content.contains(q));
        category && scope && query
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKnowledge {
    pub title: String,
    pub content: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, rename = "isShared")]
    pub shared: bool,
}

fn default_category() -> String {
    "Personal".to_string()
}

impl Workspace {
    pub async fn knowledge(&self, filter: &KnowledgeFilter) -> Result<Vec<KnowledgeItem>> {
        let items = self.load_seeded(keys::KNOWLEDGE_ITEMS, seed).await?;
        Ok(items.into_iter().filter(|i| filter.matches(i)).collect())
    }

    /// Save a new entry as a draft owned by the current user.
    pub async fn add_knowledge(&self, new: NewKnowledge) -> Result<KnowledgeItem> {
        if new.title.trim().is_empty() || new.content.trim().is_empty() {
            return Err(ValidationError::EmptyInput.into());
        }

        let item = KnowledgeItem {
            id: new_id(),
            title: new.title.trim().to_string(),
            content: new.content,
            status: ReviewStatus::Draft,
            category: new.category,
            owner: self.user_id.clone(),
            shared: new.shared,
        };

        let stored = item.clone();
        self.update_seeded(keys::KNOWLEDGE_ITEMS, seed, move |items| {
            items.push(stored);
            Ok(())
        })
        .await?;

        info!("Added knowledge draft {} ({})", item.id, item.title);
        Ok(item)
    }

    /// Send a draft for review.
    pub async fn submit_knowledge(&self, id: &str) -> Result<KnowledgeItem> {
        self.update_seeded(keys::KNOWLEDGE_ITEMS, seed, |items| {
            let item = items
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| RecordError::NotFound {
                    kind: "Knowledge item",
                    id: id.to_string(),
                })?;
            if item.status != ReviewStatus::Draft {
                return Err(RecordError::Invalid(format!(
                    "Only drafts can be submitted for review; '{}' is {:?}",
                    item.title, item.status
                )));
            }
            item.status = ReviewStatus::Pending;
            Ok(item.clone())
        })
        .await
    }
}

/// Entries present before anything has been written.
fn seed() -> Vec<KnowledgeItem> {
    let entries = [
        ("1", "Community elderly care policy", "Latest reading of the elderly care policy...\n1. Who is eligible\n2. Services\n3. How to apply", ReviewStatus::Approved, "Policy", "admin", true),
        ("2", "Summer activities for children", "Summer schedule from July 15 to August 20...\nCalligraphy, painting and crafts", ReviewStatus::Pending, "Activities", "admin", false),
        ("3", "Community services guide", "Contacts for repairs, housekeeping and more...", ReviewStatus::Approved, "Services", "system", true),
        ("4", "Draft waste sorting rules", "Proposed new waste sorting standard...", ReviewStatus::Draft, "Policy", "admin", false),
        ("5", "Community safety regulations", "Patrol schedule and emergency procedures...", ReviewStatus::Approved, "Management", "system", true),
        ("6", "Personal work notes", "July visit records and resident feedback...", ReviewStatus::Draft, "Personal", "admin", false),
    ];

    entries
        .into_iter()
        .map(|(id, title, content, status, category, owner, shared)| KnowledgeItem {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            status,
            category: category.to_string(),
            owner: owner.to_string(),
            shared,
        })
        .collect()
}
