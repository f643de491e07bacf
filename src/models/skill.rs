//! Skill catalog records.

use serde::{Deserialize, Serialize};

/// A named capability the agent can be asked to use.
///
/// Records come from an external scanner or from configuration; the driver
/// only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Skill {
    /// Opaque identifier. Defaults to `name` when omitted.
    #[serde(default)]
    pub id: String,
    /// Invocation name, used in the `/<name>` selector.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
}

impl Skill {
    /// Construct a skill record.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    /// Human-friendly name: dashes become spaces and each word is capitalised.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .split('-')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
                })
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Selector token that makes the agent invoke this skill.
    #[must_use]
    pub fn selector(&self) -> String {
        format!("/{}", self.name)
    }
}
