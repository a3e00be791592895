//! Streaming layer: event decoding, message assembly, and the cancellable
//! session wrapper over one process exchange.

pub mod events;
pub mod parser;
pub mod session;

pub use events::{EventPayload, StreamEvent};
pub use parser::{classify_line, EventAssembler};
pub use session::{StreamOutcome, StreamingSession};
