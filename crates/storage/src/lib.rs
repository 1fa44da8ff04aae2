//! Studyflow persistence adapters.
//!
//! Implements the [`pipeline::EventLog`] and [`pipeline::StudyStore`] ports.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File handling and locking live here; the engine sees
//! only the traits.
//!
//! | Type | Port | Durability |
//! |------|------|------------|
//! | [`JsonlEventLog`] | `EventLog` | One JSON object per line, fsync per event |
//! | [`InMemoryEventLog`] | `EventLog` | Process lifetime |
//! | [`InMemoryStudyStore`] | `StudyStore` | Process lifetime, transactional sessions |

mod journal;
mod memory;
mod query;
mod study;

pub use journal::JsonlEventLog;
pub use memory::InMemoryEventLog;
pub use study::{InMemoryStudyStore, MaterialRecord};
