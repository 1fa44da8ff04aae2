//! Persistence port for study material.
//!
//! The relational schema of materials, decks and cards lives outside this
//! workspace; operators only see the narrow session interface below. Every
//! operator invocation gets its own [`StoreSession`] so a failing operator
//! never leaves half-written state visible to its siblings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{BatchId, CardId, MaterialId, StoreError, UserId};

/// Review state of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    /// Generated, awaiting the user's review.
    Pending,
    /// Accepted into the user's study rotation.
    Active,
}

/// A persisted study card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    /// Card identity.
    pub id: CardId,
    /// Owner of the card.
    pub owner: UserId,
    /// Material the card was derived from.
    pub material: MaterialId,
    /// Card family, e.g. `"flashcard"` or `"reading_note"`.
    pub card_type: String,
    /// Card body (`{question, answer}`, `{title, content, images?}`, ...).
    pub content: serde_json::Value,
    /// Review state.
    pub status: CardStatus,
    /// Insert batch the card belongs to.
    pub batch_id: BatchId,
    /// Zero-based position within its batch.
    pub batch_index: usize,
}

/// A unit of work against the study store.
///
/// Writes become visible to other sessions only after [`StoreSession::commit`].
/// Dropping a session without committing discards its writes.
#[async_trait]
pub trait StoreSession: Send {
    /// Stores `summary` in the material's rich data.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the material does not exist.
    async fn save_summary(&mut self, material: &MaterialId, summary: &str)
        -> Result<(), StoreError>;

    /// Stages new cards for insertion.
    async fn insert_cards(&mut self, cards: Vec<CardRecord>) -> Result<(), StoreError>;

    /// Cards of `card_type` for `material`, ordered by batch index.
    ///
    /// Staged but uncommitted cards of this session are included.
    async fn cards_for_material(
        &mut self,
        material: &MaterialId,
        card_type: &str,
    ) -> Result<Vec<CardRecord>, StoreError>;

    /// Sets `content.images` on a card.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the card does not exist.
    async fn set_card_images(&mut self, card: CardId, images: Vec<String>)
        -> Result<(), StoreError>;

    /// Makes all staged writes visible atomically.
    async fn commit(&mut self) -> Result<(), StoreError>;
}

/// Factory for [`StoreSession`]s, shared by every operator of a run.
#[async_trait]
pub trait StudyStore: Send + Sync {
    /// Opens a new isolated session.
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}
