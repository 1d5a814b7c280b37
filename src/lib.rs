//! chatgate - a streaming conversational gateway with admission control
//!
//! The crate wires three cores together:
//!
//! - `admission` - the server-side pipeline that decides, per request, whether
//!   a generation call may proceed (origin check, oracle, sliding window,
//!   token bucket, content validation)
//! - `directive` - the parser that extracts `{{choice:...}}` / `{{link:...}}`
//!   buttons from streamed assistant text, safe to run on any prefix
//! - `throttle` / `session` - the client-side gate that paces outgoing
//!   messages and tracks server-imposed cooldowns
//!
//! The generation engine and the counter store sit behind traits in `engine`
//! and `admission::counters`; working in-process implementations ship with
//! the crate.

pub mod admission;
pub mod config;
pub mod directive;
pub mod engine;
pub mod error;
pub mod server;
pub mod session;
pub mod throttle;
pub mod types;

pub use admission::{AdmissionVerdict, LimiterKind, ReasonKind, RequestMetadata, admit};
pub use config::ChatbotConfig;
pub use directive::{Directive, Parsed, parse};
pub use error::ChatError;
pub use session::ChatSession;
pub use throttle::{SubmitOutcome, ThrottleGate, ThrottlePhase};
pub use types::{ChatMessage, ChatRequest, Role};
