//! Event dispatch pipeline.
//!
//! Every canonical `Event`, whether pushed by a webhook or pulled from a
//! mailbox history feed, flows through:
//! 1. `Deduplicator::allow()`: burst suppression per dedup key
//! 2. `rules::find_first_match()`: first matching operator rule
//! 3. `template::render()`: message text, raw-template fallback on error
//! 4. `Dispatcher::dispatch()`: one-shot action on the execution gateway
//!
//! No stage surfaces an error to the event source.

pub mod dedup;
pub mod dispatch;
pub mod processor;
pub mod rules;
pub mod template;
pub mod types;

pub use dedup::Deduplicator;
pub use dispatch::{Dispatcher, ExecutionGateway};
pub use processor::{Outcome, Pipeline};
pub use rules::Rule;
pub use types::{ActionDescriptor, ActionSpec, Event, EventSource};
