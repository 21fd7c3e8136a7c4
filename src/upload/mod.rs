//! Chunked Upload Module
//!
//! Accepts a large object as an ordered sequence of independently
//! transmitted chunks, persists each chunk durably, and reassembles
//! them into one contiguous object with exactly-once delivery to the
//! backing store.
//!
//! Flow:
//! 1. `init` opens a session and reserves the final storage key
//! 2. Chunks arrive in any order, each stored under (upload_id, index)
//! 3. `finalize` fetches all chunks concurrently, concatenates them in
//!    index order, writes the final object, and purges transient state

pub mod assembler;
pub mod chunk_sink;
pub mod coordinator;
pub mod session;
pub mod types;

pub use chunk_sink::ChunkSink;
pub use coordinator::UploadCoordinator;
pub use session::{DurableSessionStore, MemorySessionStore, SessionStore};
pub use types::*;
