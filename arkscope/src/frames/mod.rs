//! Frame layouts and stack walking
//!
//! - [`descriptor`]: one [`FrameDescriptor`] per frame type
//! - [`walker`]: the callee → caller state machine built on top of it

pub mod descriptor;
pub mod walker;

pub use descriptor::{
    lookup, FrameCategory, FrameDescriptor, FunctionSlot, PcSource, FRAME_DESCRIPTORS,
    MAX_ARGV_LEN,
};
pub use walker::{
    FramePc, FrameWalker, ManagedStep, NativeFrame, StackCursor, Step, Walk, WalkEnd, WalkedFrame,
};
