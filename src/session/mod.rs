//! Session control: lifecycle state, the state machine, operator signals
//! and event observers

mod events;
mod journal;
mod machine;
mod pipeline;
pub mod signals;
mod state;

pub use events::{EVENT_CAPACITY, SessionEvent, event_channel};
pub use journal::{JournalEntry, TranscriptJournal};
pub use machine::SessionMachine;
pub use pipeline::Pipeline;
pub use signals::{Control, Interrupt, Operator, Signals, channel};
pub use state::SessionState;
