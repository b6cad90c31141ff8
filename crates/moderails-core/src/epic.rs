use crate::error::Result;
use crate::paths::validate_tag;
use crate::task::{generate_id, validate_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub name: String,
    /// Declaration order matters: tag-scoped context is emitted in this order.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewEpic {
    pub name: String,
    pub tags: Vec<String>,
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EpicUpdate {
    pub name: Option<String>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub add_skills: Vec<String>,
    pub remove_skills: Vec<String>,
}

impl EpicUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.add_tags.is_empty()
            && self.remove_tags.is_empty()
            && self.add_skills.is_empty()
            && self.remove_skills.is_empty()
    }
}

/// Completion progress of an epic's tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpicProgress {
    pub total: usize,
    pub completed: usize,
    pub open: Vec<String>,
}

impl EpicProgress {
    /// An epic with no tasks has nothing to be complete about.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.open.is_empty()
    }
}

impl Epic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            name: name.into().trim().to_string(),
            tags: Vec::new(),
            skills: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Add a tag, keeping declaration order. Returns false if already present.
    pub fn add_tag(&mut self, tag: &str) -> Result<bool> {
        validate_tag(tag)?;
        Ok(push_unique(&mut self.tags, tag))
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        remove(&mut self.tags, tag)
    }

    /// Add a skill reference. Existence on disk is checked by the engine.
    pub fn add_skill(&mut self, skill: &str) -> Result<bool> {
        validate_tag(skill)?;
        Ok(push_unique(&mut self.skills, skill))
    }

    pub fn remove_skill(&mut self, skill: &str) -> bool {
        remove(&mut self.skills, skill)
    }

    pub fn apply_update(&mut self, update: &EpicUpdate) -> Result<()> {
        if let Some(name) = &update.name {
            validate_name(name)?;
            self.name = name.trim().to_string();
        }
        for tag in &update.remove_tags {
            self.remove_tag(tag);
        }
        for tag in &update.add_tags {
            self.add_tag(tag)?;
        }
        for skill in &update.remove_skills {
            self.remove_skill(skill);
        }
        for skill in &update.add_skills {
            self.add_skill(skill)?;
        }
        Ok(())
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) -> bool {
    if list.iter().any(|s| s == item) {
        return false;
    }
    list.push(item.to_string());
    true
}

fn remove(list: &mut Vec<String>, item: &str) -> bool {
    let before = list.len();
    list.retain(|s| s != item);
    list.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RailsError;

    #[test]
    fn tags_keep_declaration_order_without_duplicates() {
        let mut epic = Epic::new("Checkout");
        assert!(epic.add_tag("payments").unwrap());
        assert!(epic.add_tag("auth").unwrap());
        assert!(!epic.add_tag("payments").unwrap());
        assert_eq!(epic.tags, vec!["payments", "auth"]);
    }

    #[test]
    fn invalid_tag_rejected() {
        let mut epic = Epic::new("Checkout");
        assert!(matches!(epic.add_tag("Bad Tag"), Err(RailsError::InvalidTag(_))));
    }

    #[test]
    fn update_renames_and_edits_sets() {
        let mut epic = Epic::new("Checkout");
        epic.add_tag("auth").unwrap();
        epic.apply_update(&EpicUpdate {
            name: Some(" Checkout v2 ".into()),
            add_tags: vec!["payments".into()],
            remove_tags: vec!["auth".into()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(epic.name, "Checkout v2");
        assert_eq!(epic.tags, vec!["payments"]);
    }

    #[test]
    fn empty_epic_is_not_complete() {
        let progress = EpicProgress {
            total: 0,
            completed: 0,
            open: Vec::new(),
        };
        assert!(!progress.is_complete());
    }
}
