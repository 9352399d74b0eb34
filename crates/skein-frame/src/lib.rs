//! The lexical frame tree and async write-count protocol (spec.md §3, §4.1).

pub mod async_frame;
pub mod err;
pub mod frame;

pub use err::{Error, Result};
pub use frame::{Frame, FrameId, FrameTree, SetTarget};
