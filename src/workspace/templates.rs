use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Result, Workspace};
use crate::error::RecordError;
use crate::store::keys;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVersion {
    pub id: String,
    pub version: String,
    pub update_note: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub title: String,
    pub description: String,
    pub rating: f32,
    pub use_count: u32,
    #[serde(rename = "isHot")]
    pub hot: bool,
    pub versions: Vec<TemplateVersion>,
}

/// A catalog entry with the caller's favorite flag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateView {
    #[serde(flatten)]
    pub template: Template,
    pub favorite: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateSort {
    #[default]
    Rating,
    UseCount,
}

impl Workspace {
    /// The catalog, best first.
    pub async fn templates(&self, sort: TemplateSort) -> Result<Vec<TemplateView>> {
        let favorites: Vec<String> = self.store.get_list(keys::TEMPLATE_FAVORITES).await?;
        let mut views: Vec<TemplateView> = self
            .catalog
            .read()
            .await
            .iter()
            .map(|t| TemplateView {
                favorite: favorites.contains(&t.id),
                template: t.clone(),
            })
            .collect();

        match sort {
            TemplateSort::Rating => views.sort_by(|a, b| b.template.rating.total_cmp(&a.template.rating)),
            TemplateSort::UseCount => views.sort_by(|a, b| b.template.use_count.cmp(&a.template.use_count)),
        }
        Ok(views)
    }

    /// Flip the favorite flag and return the new state.
    pub async fn toggle_favorite(&self, id: &str) -> Result<bool> {
        self.ensure_template(id).await?;

        let _guard = self.writes.lock().await;
        let favorite = self
            .store
            .update_list(keys::TEMPLATE_FAVORITES, |ids: &mut Vec<String>| {
                if let Some(pos) = ids.iter().position(|f| f == id) {
                    ids.remove(pos);
                    false
                } else {
                    ids.push(id.to_string());
                    true
                }
            })
            .await?;

        info!("Template {} favorite: {}", id, favorite);
        Ok(favorite)
    }

    /// Set a template's rating for this process lifetime.
    pub async fn rate_template(&self, id: &str, rating: f32) -> Result<Template> {
        if !(1.0..=5.0).contains(&rating) {
            return Err(RecordError::Invalid(format!(
                "Rating must be between 1 and 5, got {}",
                rating
            )));
        }

        let mut catalog = self.catalog.write().await;
        let template = catalog
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found(id))?;
        template.rating = rating;
        Ok(template.clone())
    }

    async fn ensure_template(&self, id: &str) -> Result<()> {
        if self.catalog.read().await.iter().any(|t| t.id == id) {
            Ok(())
        } else {
            Err(not_found(id))
        }
    }
}

fn not_found(id: &str) -> RecordError {
    RecordError::NotFound {
        kind: "Template",
        id: id.to_string(),
    }
}

pub fn catalog() -> Vec<Template> {
    fn versions(entries: &[(&str, &str, &str)]) -> Vec<TemplateVersion> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (version, note, date))| TemplateVersion {
                id: (i + 1).to_string(),
                version: version.to_string(),
                update_note: note.to_string(),
                date: date.to_string(),
            })
            .collect()
    }

    vec![
        Template {
            id: "1".into(),
            title: "Community event notice".into(),
            description: "Festival events, resident meetings and similar announcements".into(),
            rating: 4.5,
            use_count: 128,
            hot: true,
            versions: versions(&[
                ("1.0", "Initial version", "2025-06-01"),
                ("1.1", "Added holiday greetings", "2025-06-15"),
            ]),
        },
        Template {
            id: "2".into(),
            title: "Financial disclosure".into(),
            description: "Standard template for publishing community income and spending".into(),
            rating: 4.2,
            use_count: 86,
            hot: false,
            versions: versions(&[("1.0", "Initial version", "2025-05-10")]),
        },
        Template {
            id: "3".into(),
            title: "Resident services guide".into(),
            description: "Collected contacts for community services".into(),
            rating: 4.8,
            use_count: 156,
            hot: true,
            versions: versions(&[
                ("1.0", "Initial version", "2025-04-20"),
                ("1.1", "Added repair services category", "2025-05-05"),
                ("1.2", "Updated contact details", "2025-06-12"),
            ]),
        },
        Template {
            id: "4".into(),
            title: "Home visit record".into(),
            description: "Record sheet for staff visiting residents".into(),
            rating: 3.9,
            use_count: 64,
            hot: false,
            versions: versions(&[("1.0", "Initial version", "2025-05-25")]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::temp_workspace;

    fn ids(views: &[TemplateView]) -> Vec<&str> {
        views.iter().map(|v| v.template.id.as_str()).collect()
    }

    #[tokio::test]
    async fn sorts_by_rating_or_use_count() {
        let (_dir, ws) = temp_workspace().await;
        let by_rating = ws.templates(TemplateSort::Rating).await.unwrap();
        assert_eq!(ids(&by_rating), vec!["3", "1", "2", "4"]);

        let by_use = ws.templates(TemplateSort::UseCount).await.unwrap();
        assert_eq!(ids(&by_use), vec!["3", "1", "2", "4"]);

        ws.rate_template("4", 5.0).await.unwrap();
        let by_rating = ws.templates(TemplateSort::Rating).await.unwrap();
        assert_eq!(by_rating[0].template.id, "4");
    }

    #[tokio::test]
    async fn favorites_toggle_and_persist() {
        let (_dir, ws) = temp_workspace().await;
        assert!(ws.toggle_favorite("2").await.unwrap());

        let views = ws.templates(TemplateSort::Rating).await.unwrap();
        let fav: Vec<&str> = views
            .iter()
            .filter(|v| v.favorite)
            .map(|v| v.template.id.as_str())
            .collect();
        assert_eq!(fav, vec!["2"]);

        assert!(!ws.toggle_favorite("2").await.unwrap());
        let stored: Vec<String> = ws.store.get_list(keys::TEMPLATE_FAVORITES).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn unknown_template_and_bad_rating_are_rejected() {
        let (_dir, ws) = temp_workspace().await;
        assert!(matches!(
            ws.toggle_favorite("99").await,
            Err(RecordError::NotFound { .. })
        ));
        assert!(matches!(
            ws.rate_template("1", 6.0).await,
            Err(RecordError::Invalid(_))
        ));
    }

    #[test]
    fn view_flattens_template_fields() {
        let view = TemplateView {
            template: catalog().remove(0),
            favorite: true,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["useCount"], 128);
        assert_eq!(json["isHot"], true);
        assert_eq!(json["favorite"], true);
        assert_eq!(json["versions"][1]["updateNote"], "Added holiday greetings");
    }
}
