pub use self::content::{ContentExtractor, ExtractError, Extraction, TextTransform, Visual};
pub use self::draft::PostDraft;
pub use self::engine::{Outcome, StarboardEngine, StarboardError};
pub use self::event::{DeleteEvent, ReactionEvent, ReactionState, StarboardEvent};
pub use self::guard::{Cancelled, ConcurrencyGuard, GuardToken};

pub mod content;
pub mod draft;
pub mod engine;
pub mod event;
pub mod guard;
pub mod url;
