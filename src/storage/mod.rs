//! Storage module for S3-compatible backends
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2, and AWS S3, plus a
//! local filesystem backend for development and tests.

mod fs;
mod object_store;
mod s3;

pub use fs::FsStore;
pub use object_store::{ObjectStore, STORE_OP_TIMEOUT};
pub use s3::S3Store;
