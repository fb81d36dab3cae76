//! Todo generation: data model and the ranked-list generator.

pub mod generator;
pub mod model;

pub use generator::{ScoredMessage, TodoGenerator};
pub use model::{HandlingWindow, TierCounts, TodoItem, TodoList};
