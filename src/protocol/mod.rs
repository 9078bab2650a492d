//! Protocol Implementation
//!
//! Frame codec, status content and the built-in engine that answers
//! status pings and bootstraps protocol 47 logins.

pub mod codec;
pub mod constants;
pub mod engine;
pub mod status;
pub mod types;

pub use codec::{CodecError, FrameCodec};
pub use constants::*;
pub use engine::{EngineFlow, LimboEngine, ProtocolEngine};
pub use status::StatusTemplate;
pub use types::*;
