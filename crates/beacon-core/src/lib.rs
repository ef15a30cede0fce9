//! # beacon-core
//!
//! Wire-level building blocks shared by the relay and its peers.
//!
//! - [`frame`]: the length-prefixed frame codec (`[i32 LE length][payload]`)
//! - [`errors`]: typed framing errors
//!
//! Payloads are opaque. Nothing in this crate inspects or mutates them.

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;

pub use errors::FrameError;
pub use frame::{
    DEFAULT_MAX_FRAME_SIZE, Fill, LENGTH_PREFIX_LEN, decode_length, encode_length, read_frame,
    read_full, read_payload, write_frame,
};
