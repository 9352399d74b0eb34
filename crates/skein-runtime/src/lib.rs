//! The poison error protocol, value resolution, async block driver,
//! iteration engine, sequence locks, and output buffer for the skein
//! async evaluation runtime (spec.md §4.2-§4.8).

pub mod async_state;
pub mod call;
pub mod err;
pub mod iterate;
pub mod output;
pub mod poison;
pub mod resolve;
pub mod seqlock;

pub use err::{Error, Result};

pub mod prelude {
    pub use crate::async_state::{execute_async_block, AsyncState, AsyncStateId};
    pub use crate::call::{call_wrap, context_or_frame_lookup, member_lookup, LookupMode};
    pub use crate::err::{Error, Result};
    pub use crate::output::{HandlerEnv, OutputBuffer};
    pub use crate::poison::{collect_errors, create_poison, handle_error, is_poison, is_poison_error};
    pub use crate::resolve::{resolve_all, resolve_single};
}
