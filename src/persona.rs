use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_PERSONA: &str = "default";

/// A backend agent the user can route messages to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub display_name: String,
    /// Access key the backend uses to pick the agent. Never sent to the browser.
    pub credential: String,
    pub description: String,
}

/// Public view of a persona, without its credential.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSummary {
    pub id: String,
    pub display_name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, Persona>,
}

impl PersonaRegistry {
    pub fn new(personas: BTreeMap<String, Persona>) -> Result<Self> {
        if !personas.contains_key(DEFAULT_PERSONA) {
            bail!("Persona table has no '{}' entry", DEFAULT_PERSONA);
        }
        Ok(Self { personas })
    }

    /// The table shipped with the application.
    pub fn builtin() -> Self {
        let entries = [
            (
                "writing",
                "Writing assistant",
                "app-ngW2ijJTWYiSNnMCx7BlrR1j",
                "Drafts copy, notices and letters",
            ),
            (
                "image",
                "Image generation",
                "app-7vRMOdglNWOTaal8i2cACia3",
                "Generates pictures from a text description",
            ),
            (
                "analysis",
                "Data analysis",
                "app-xxxAnalysisAgentKeyxxx",
                "Statistics and trend analysis",
            ),
            (
                "finance",
                "Financial review",
                "app-cCbBhbI2aJKxKiFiehURFz6I",
                "Bill recognition and financial data review",
            ),
            (
                DEFAULT_PERSONA,
                "General assistant",
                "app-ngW2ijJTWYiSNnMCx7BlrR1j",
                "Handles everything else",
            ),
        ];

        let personas = entries
            .into_iter()
            .map(|(id, name, credential, description)| {
                (
                    id.to_string(),
                    Persona {
                        display_name: name.to_string(),
                        credential: credential.to_string(),
                        description: description.to_string(),
                    },
                )
            })
            .collect();

        Self { personas }
    }

    /// Load a JSON object `{ "<id>": { displayName, credential, description } }`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read persona file {}", path.display()))?;
        let personas: BTreeMap<String, Persona> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse persona file {}", path.display()))?;
        Self::new(personas)
    }

    /// Look up a persona id, falling back to the default entry.
    /// Returns the id that was actually resolved alongside the persona.
    pub fn resolve<'a>(&'a self, id: &'a str) -> (&'a str, &'a Persona) {
        match self.personas.get_key_value(id) {
            Some((key, persona)) => (key.as_str(), persona),
            None => (DEFAULT_PERSONA, self.default_persona()),
        }
    }

    pub fn default_persona(&self) -> &Persona {
        // Guaranteed by construction.
        &self.personas[DEFAULT_PERSONA]
    }

    /// Text pre-filled into the compose field when a persona is picked.
    pub fn prompt_stub(&self, id: &str) -> String {
        let (_, persona) = self.resolve(id);
        format!("Use {}: ", persona.display_name)
    }

    pub fn summaries(&self) -> Vec<PersonaSummary> {
        self.personas
            .iter()
            .map(|(id, p)| PersonaSummary {
                id: id.clone(),
                display_name: p.display_name.clone(),
                description: p.description.clone(),
            })
            .collect()
    }
}
