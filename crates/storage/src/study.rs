//! In-memory study store with transactional sessions.
//!
//! Sessions stage writes locally and apply them under the store lock on
//! commit, so uncommitted work of a failed operator is simply dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use pipeline::{CardId, CardRecord, MaterialId, StoreError, StoreSession, StudyStore, UserId};
use serde_json::{Map, Value};
use tracing::debug;

/// A content material and its derived rich data.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRecord {
    /// Material identity.
    pub id: MaterialId,
    /// Owning user.
    pub owner: UserId,
    /// Display title.
    pub title: String,
    /// Derived data (`summary`, `suggestions`, ...).
    pub rich_data: Map<String, Value>,
}

#[derive(Debug, Default)]
struct StoreState {
    materials: BTreeMap<MaterialId, MaterialRecord>,
    cards: Vec<CardRecord>,
}

/// [`StudyStore`] kept in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStudyStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStudyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a material so summaries can be attached to it.
    ///
    /// # Errors
    ///
    /// [`StoreError::LockPoisoned`] if the lock is poisoned.
    pub fn add_material(
        &self,
        id: MaterialId,
        owner: UserId,
        title: impl Into<String>,
    ) -> Result<(), StoreError> {
        let record = MaterialRecord {
            id: id.clone(),
            owner,
            title: title.into(),
            rich_data: Map::new(),
        };
        lock(&self.state)?.materials.insert(id, record);
        Ok(())
    }

    /// Committed state of a material.
    ///
    /// # Errors
    ///
    /// [`StoreError::LockPoisoned`] if the lock is poisoned.
    pub fn material(&self, id: &MaterialId) -> Result<Option<MaterialRecord>, StoreError> {
        Ok(lock(&self.state)?.materials.get(id).cloned())
    }

    /// Every committed card in insertion order.
    ///
    /// # Errors
    ///
    /// [`StoreError::LockPoisoned`] if the lock is poisoned.
    pub fn cards(&self) -> Result<Vec<CardRecord>, StoreError> {
        Ok(lock(&self.state)?.cards.clone())
    }
}

fn lock(state: &Mutex<StoreState>) -> Result<MutexGuard<'_, StoreState>, StoreError> {
    state.lock().map_err(|_| StoreError::LockPoisoned)
}

#[async_trait]
impl StudyStore for InMemoryStudyStore {
    async fn begin(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum PendingWrite {
    Summary {
        material: MaterialId,
        summary: String,
    },
    Cards(Vec<CardRecord>),
    CardImages {
        card: CardId,
        images: Vec<String>,
    },
}

struct InMemorySession {
    state: Arc<Mutex<StoreState>>,
    pending: Vec<PendingWrite>,
}

impl InMemorySession {
    fn staged_cards(&self) -> impl Iterator<Item = &CardRecord> {
        self.pending
            .iter()
            .filter_map(|write| match write {
                PendingWrite::Cards(cards) => Some(cards),
                _ => None,
            })
            .flatten()
    }
}

fn set_images(content: &mut Value, images: Vec<String>) {
    let images = Value::from(images);
    match content {
        Value::Object(map) => {
            map.insert("images".to_string(), images);
        }
        other => {
            let mut map = Map::new();
            map.insert("answer".to_string(), other.take());
            map.insert("images".to_string(), images);
            *other = Value::Object(map);
        }
    }
}

#[async_trait]
impl StoreSession for InMemorySession {
    async fn save_summary(
        &mut self,
        material: &MaterialId,
        summary: &str,
    ) -> Result<(), StoreError> {
        if !lock(&self.state)?.materials.contains_key(material) {
            return Err(StoreError::NotFound {
                entity: "material",
                id: material.to_string(),
            });
        }
        self.pending.push(PendingWrite::Summary {
            material: material.clone(),
            summary: summary.to_string(),
        });
        Ok(())
    }

    async fn insert_cards(&mut self, cards: Vec<CardRecord>) -> Result<(), StoreError> {
        self.pending.push(PendingWrite::Cards(cards));
        Ok(())
    }

    async fn cards_for_material(
        &mut self,
        material: &MaterialId,
        card_type: &str,
    ) -> Result<Vec<CardRecord>, StoreError> {
        let mut cards: Vec<CardRecord> = {
            let state = lock(&self.state)?;
            let matching = state
                .cards
                .iter()
                .chain(self.staged_cards())
                .filter(|card| &card.material == material && card.card_type == card_type)
                .cloned()
                .collect();
            matching
        };
        for write in &self.pending {
            if let PendingWrite::CardImages { card, images } = write {
                if let Some(target) = cards.iter_mut().find(|c| c.id == *card) {
                    set_images(&mut target.content, images.clone());
                }
            }
        }
        cards.sort_by_key(|card| card.batch_index);
        Ok(cards)
    }

    async fn set_card_images(
        &mut self,
        card: CardId,
        images: Vec<String>,
    ) -> Result<(), StoreError> {
        let known = lock(&self.state)?.cards.iter().any(|c| c.id == card)
            || self.staged_cards().any(|c| c.id == card);
        if !known {
            return Err(StoreError::NotFound {
                entity: "card",
                id: card.to_string(),
            });
        }
        self.pending.push(PendingWrite::CardImages { card, images });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut state = lock(&self.state)?;
        let writes = std::mem::take(&mut self.pending);
        debug!(writes = writes.len(), "Committing study store session");
        for write in writes {
            match write {
                PendingWrite::Summary { material, summary } => {
                    if let Some(record) = state.materials.get_mut(&material) {
                        record
                            .rich_data
                            .insert("summary".to_string(), Value::String(summary));
                        record
                            .rich_data
                            .entry("suggestions")
                            .or_insert_with(|| Value::Array(Vec::new()));
                    }
                }
                PendingWrite::Cards(cards) => state.cards.extend(cards),
                PendingWrite::CardImages { card, images } => {
                    if let Some(target) = state.cards.iter_mut().find(|c| c.id == card) {
                        set_images(&mut target.content, images);
                    }
                }
            }
        }
        Ok(())
    }
}
