//! # card-studio
//!
//! Domain collaborators for the card-design assistant: projects and their
//! cards, image-generation job tracking, the upload blob cache, generated
//! image files, and the tools the model uses to work with all of them.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Project "Bestiary"                                       │
//! ├───────────────────────────────────────────────────────────┤
//! │  Card "Dragon"   images: dragon-1.png, dragon-2.png  [*2] │
//! │  Card "Griffin"  images: (none)                           │
//! └───────────────────────────────────────────────────────────┘
//!          │ generate_card_image
//!          ▼
//!   deferred `generate_image` action ──► external executor
//!          ▲                                   │
//!          └──────── JobTracker ◄── progress ──┘
//! ```

pub mod artifacts;
pub mod blobs;
pub mod context;
pub mod error;
pub mod fs;
pub mod jobs;
pub mod model;
pub mod store;
pub mod svckit;

use std::sync::Arc;

use agent_core::ToolRegistry;

pub use artifacts::FsArtifactStore;
pub use blobs::FileBlobCache;
pub use context::StudioContext;
pub use error::{Result, StudioError};
pub use jobs::{InMemoryJobTracker, JobTracker};
pub use model::{Card, JobParams, JobRecord, JobStatus, JobUpdate, Project, ProjectSummary};
pub use store::{FileProjectStore, MemoryProjectStore, ProjectFilter, ProjectStore};

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{
        CreateCardTool, CreateProjectTool, GenerateCardImageTool, GetProjectTool, JobStatusTool,
        ListProjectsTool, UpdateCardTool, ViewCardImageTool,
    };
}

/// Deferred action kind produced by `generate_card_image`
pub const GENERATE_IMAGE_ACTION: &str = "generate_image";

/// Register every studio tool
pub fn register_tools(
    registry: &mut ToolRegistry,
    projects: &Arc<dyn ProjectStore>,
    jobs: &Arc<dyn JobTracker>,
    artifacts: &Arc<FsArtifactStore>,
) {
    use tools::*;

    registry.register(ListProjectsTool::new(projects.clone()));
    registry.register(GetProjectTool::new(projects.clone()));
    registry.register(CreateProjectTool::new(projects.clone()));
    registry.register(CreateCardTool::new(projects.clone()));
    registry.register(UpdateCardTool::new(projects.clone()));
    registry.register(ViewCardImageTool::new(projects.clone(), artifacts.clone()));
    registry.register(GenerateCardImageTool::new(projects.clone()));
    registry.register(JobStatusTool::new(jobs.clone()));
}

/// System prompt for the card studio assistant
pub const STUDIO_ASSISTANT_PROMPT: &str = r#"You are a creative assistant helping the user design illustrated cards (trading cards, tarot decks, game cards) organised into projects.

## How You Work

1. Use `list_projects` and `get_project` to see what exists before changing anything
2. Use `create_project` and `create_card` when the user wants something new
3. Use `update_card` to change a card's text or pick which image represents it
4. Use `view_card_image` when you need to see a card's artwork to critique or iterate on it
5. Use `generate_card_image` to request new artwork; it runs in the background
6. Use `get_job_status` to check on artwork that is being generated

## Attachments

When the user attaches images, their message ends with an `[attachments]` block. Each line describes one image in the order the images appear, with its `inlineIndex`. To use attached images as references for `generate_card_image`, pass those indices in `referenceIndices`.

## Context

Each message may begin with a `[context]` block describing the project the user has open, other projects, and recent image jobs. Treat it as current state; it is refreshed every turn.

## Image Prompts

Write image prompts as vivid, concrete descriptions: subject, composition, lighting, palette. The project's style is appended automatically; don't repeat it.

Keep replies short and focused on the cards."#;
