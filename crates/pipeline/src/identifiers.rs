//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! an [`OpId`] (one usage inside a pipeline) with the [`OperatorKey`] it refers
//! to, even though both are strings under the hood.

use std::borrow::Borrow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, from_static(), as_str(),
// Display, Borrow<str> (for map lookups by &str) and a validating
// Deserialize (empty strings are rejected).
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Creates an identifier from a string literal.
            ///
            /// # Panics
            ///
            /// Panics if `value` is empty. Intended for compile-time constants
            /// such as built-in operator keys and template identifiers.
            pub fn from_static(value: &'static str) -> Self {
                assert!(!value.is_empty(), concat!(stringify!($name), " must not be empty"));
                Self(value.to_owned())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value).ok_or_else(|| {
                    concat!(stringify!($name), " must not be empty").to_string()
                })
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for UUID-wrapped newtypes.
// Generates: struct, new_random(), from_uuid(), as_uuid(), Display, FromStr.
// ---------------------------------------------------------------------------
macro_rules! uuid_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID (e.g. deserialised from state).
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying [`Uuid`].
            pub fn as_uuid(self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

uuid_id! {
    /// Identifies one pipeline run for one content item.
    ///
    /// The run id is the correlation key of the event log: re-invoking the engine
    /// with the same [`RunId`] resumes the run and skips every unit of work that
    /// was already recorded as completed.
    RunId
}

uuid_id! {
    /// Identifies a persisted study card.
    CardId
}

uuid_id! {
    /// Groups the cards inserted by one `save_cards` invocation.
    BatchId
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (configuration names)
// ---------------------------------------------------------------------------

string_id! {
    /// Globally unique, stable identifier of an operator implementation
    /// (e.g. `"summary"`, `"save_cards"`).
    ///
    /// Used for registry lookup and must stay stable across pipeline edits.
    OperatorKey
}

string_id! {
    /// Identifies one usage of an operator inside a pipeline.
    ///
    /// Unique per pipeline. The same operator may appear several times under
    /// different op ids (e.g. `save_flashcards` and `save_reading_notes` both
    /// use `save_cards`).
    OpId
}

string_id! {
    /// Identifies a [`crate::Step`] within a pipeline (e.g. `"summarize"`).
    StepKey
}

string_id! {
    /// Identifies an edge within a pipeline graph.
    EdgeId
}

string_id! {
    /// Identifies a pipeline definition (e.g. `"paper_default"`).
    PipelineId
}

string_id! {
    /// Names an input or output port on an operator (e.g. `"text"`).
    PortKey
}

string_id! {
    /// Identifies the user on whose behalf a run executes.
    UserId
}

string_id! {
    /// Identifies the content material (the ingested document record) that a
    /// run derives study material for.
    MaterialId
}

/// Wire value of the sentinel source meaning "the pipeline's initial input".
pub const INITIAL_INPUT: &str = "__input__";

impl OpId {
    /// Returns the sentinel op id used as the source of initial-input edges.
    pub fn initial_input() -> Self {
        Self::from_static(INITIAL_INPUT)
    }

    /// Returns `true` if this is the initial-input sentinel.
    pub fn is_initial_input(&self) -> bool {
        self.0 == INITIAL_INPUT
    }
}
