//! The agent iteration loop.
//!
//! One run follows a **Call → Tools → Call** cycle:
//!
//! 1. **Stream** the conversation to the configured provider
//! 2. **Aggregate** content, reasoning and native tool calls, forwarding
//!    display events as they arrive
//! 3. **Extract** tool calls from the text if the provider returned none
//! 4. **If tool calls**: dispatch them in order, append the results, loop
//!    back to step 1
//! 5. **Otherwise**: merge the answer and emit `Complete`
//!
//! The loop stops at the first answer, a provider error, cancellation, or
//! one of the two iteration ceilings.

pub mod aggregator;
pub mod emitter;
pub mod extractor;
pub mod loop_runner;
pub mod state;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use aggregator::{IterationOutcome, IterationOutput, StreamAggregator};
pub use emitter::EventEmitter;
pub use extractor::{Extraction, extract_tool_calls, strip_tool_call_syntax};
pub use loop_runner::{AgentLoop, AgentRun, RunOutcome, RunStatus};
pub use state::{Acceptance, IterationState};
pub use stream_event::{AgentEvent, ErrorKind};
