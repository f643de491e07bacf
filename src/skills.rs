//! Read-only skill catalog.
//!
//! Skill discovery itself happens elsewhere; the catalog only holds the
//! records it is given, looks them up, filters them for a picker, and builds
//! the selector-prefixed prompt handed to the agent.

use crate::models::skill::Skill;
use crate::{AppError, Result};

/// Immutable list of known skills, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkillCatalog {
    skills: Vec<Skill>,
}

impl SkillCatalog {
    /// Build a catalog. Records without an id take their name as id.
    #[must_use]
    pub fn new(skills: impl IntoIterator<Item = Skill>) -> Self {
        let mut skills: Vec<Skill> = skills
            .into_iter()
            .map(|mut skill| {
                if skill.id.is_empty() {
                    skill.id.clone_from(&skill.name);
                }
                skill
            })
            .collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Self { skills }
    }

    /// All skills, sorted by name.
    #[must_use]
    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    /// Number of skills.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Look up a skill by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Skill> {
        self.skills.iter().find(|skill| skill.id == id)
    }

    /// Skills whose name or description contains `query`, case-insensitively.
    ///
    /// A leading `/` is ignored so raw slash input can be passed through; an
    /// empty query matches everything.
    #[must_use]
    pub fn filter(&self, query: &str) -> Vec<&Skill> {
        let query = query.strip_prefix('/').unwrap_or(query).trim().to_lowercase();
        self.skills
            .iter()
            .filter(|skill| {
                query.is_empty()
                    || skill.name.to_lowercase().contains(&query)
                    || skill.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    /// Build the prompt sent to the agent, prefixed with the skill selector
    /// when `skill_id` is given.
    ///
    /// # Errors
    ///
    /// - [`AppError::UnknownSkill`] if `skill_id` is not in the catalog.
    /// - [`AppError::InvalidInput`] if there is neither text nor a skill.
    pub fn compose_prompt(&self, text: &str, skill_id: Option<&str>) -> Result<String> {
        let text = text.trim();
        match skill_id {
            Some(id) => {
                let skill = self
                    .get(id)
                    .ok_or_else(|| AppError::UnknownSkill(id.to_owned()))?;
                if text.is_empty() {
                    Ok(skill.selector())
                } else {
                    Ok(format!("{} {text}", skill.selector()))
                }
            }
            None if text.is_empty() => Err(AppError::InvalidInput("prompt is empty".into())),
            None => Ok(text.to_owned()),
        }
    }
}
