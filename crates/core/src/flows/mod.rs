pub mod classify;
pub mod engine;
pub mod states;
pub mod summary;

pub use classify::{classify_affirmation, extract_full_name, extract_guest_count, Affirmation, FullName};
pub use engine::FlowEngine;
pub use states::{StepId, Turn, TurnDisposition};
pub use summary::{GuestRecommendation, SummaryRenderer};
