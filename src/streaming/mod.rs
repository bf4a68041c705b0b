//! Chunked audio streaming on top of the RPC layer.
//!
//! This module provides:
//! - [`AudioSource`]: lazily loaded track metadata and chunk fetches from a remote backend
//! - [`Chunk`] decoding of the backend's little-endian `f32` buffers
//! - [`build_segments`]: sample-accurate reassembly of chunks into one-second [`Segment`]s
//!
//! # Example
//!
//! ```rust,no_run
//! use audio_link::rpc::{MemoryChannel, RpcClient};
//! use audio_link::streaming::*;
//! use std::sync::Arc;
//!
//! # async fn run(channel: MemoryChannel) -> StreamResult<()> {
//! let source = AudioSource::new(RpcClient::new(Arc::new(channel)));
//! source.open();
//!
//! let metadata = source.load_metadata().await?;
//! let (frame, offset) = calculate_position(0);
//! let mut carry = Carry::starting_at(offset, metadata.sample_rate as usize);
//! let mut previous: Option<Chunk> = None;
//!
//! source
//!     .render(frame, |_frame, _size, chunk| {
//!         let Ok((segments, leftover)) =
//!             build_segments(previous.as_ref(), &chunk, carry, metadata.sample_rate as usize)
//!         else {
//!             return false;
//!         };
//!         println!("{} seconds ready", segments.len());
//!         carry = Carry::Tail(leftover);
//!         previous = Some(chunk);
//!         true
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod error;
pub mod source;

#[cfg(test)]
pub(crate) mod tests;

pub use chunk::{
    BYTES_PER_SAMPLE, CHUNK_SIZE, COMBINED_FRAMES, Carry, Chunk, SAMPLES_PER_UNIT, Segment,
    build_segments, calculate_position, chunk_start, flush_tail,
};
pub use error::{StreamError, StreamResult};
pub use source::{
    AudioRemote, AudioSource, AudioSourceMetadata, MetaReply, RenderReply, RenderRequest,
};
