//! Domain Models
//!
//! Projects group cards; each card collects the images generated for it.
//! Image generation itself runs elsewhere and is tracked as a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A collection of cards sharing a theme
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Style guidance applied to every card's image prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    #[serde(default)]
    pub cards: Vec<Card>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            style: None,
            cards: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn card(&self, card_id: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == card_id)
    }

    pub fn card_mut(&mut self, card_id: &str) -> Option<&mut Card> {
        self.cards.iter_mut().find(|c| c.id == card_id)
    }

    /// Whether any card in this project owns `filename`
    pub fn owns_file(&self, filename: &str) -> bool {
        self.cards.iter().any(|c| c.images.iter().any(|f| f == filename))
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            card_count: self.cards.len(),
            updated_at: self.updated_at,
        }
    }
}

/// Listing view of a project
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub card_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// A single card within a project
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,

    pub title: String,

    /// Text describing what the card should depict
    #[serde(default)]
    pub description: String,

    /// Generated image filenames, oldest first
    #[serde(default)]
    pub images: Vec<String>,

    /// The image chosen as the card's face
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_image: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Card {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            images: Vec::new(),
            selected_image: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The selected image, falling back to the newest one
    pub fn current_image(&self) -> Option<&str> {
        self.selected_image
            .as_deref()
            .or_else(|| self.images.last().map(String::as_str))
    }
}

/// Lifecycle of an image-generation job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Reference image handed to the generator
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub inline_index: usize,
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

/// What to generate; the payload of a `generate_image` deferred action
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    pub project_id: String,
    pub card_id: String,
    pub prompt: String,
    #[serde(default)]
    pub references: Vec<ReferenceImage>,
}

/// A tracked job
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub project_id: String,
    pub card_id: String,
    pub prompt: String,
    pub reference_count: usize,
    pub status: JobStatus,
    /// 0-100
    pub progress: u8,
    #[serde(default)]
    pub result_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Out-of-band progress report from the job executor
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub result_files: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_image_prefers_selection() {
        let mut card = Card::new("Dragon", "A red dragon");
        assert_eq!(card.current_image(), None);

        card.images = vec!["a.png".into(), "b.png".into()];
        assert_eq!(card.current_image(), Some("b.png"));

        card.selected_image = Some("a.png".into());
        assert_eq!(card.current_image(), Some("a.png"));
    }

    #[test]
    fn test_project_serializes_camel_case() {
        let mut project = Project::new("Bestiary", "Monsters");
        project.cards.push(Card::new("Dragon", ""));
        let value = serde_json::to_value(project.summary()).unwrap();
        assert_eq!(value["cardCount"], 1);
        assert!(value.get("updatedAt").is_some());
    }
}
