//! # XET client
//!
//! The client half of the XET content-addressed store: chunk files,
//! deduplicate locally and against the global index, pack new chunks into
//! compressed xorbs, register a shard describing how to rebuild each
//! file, and run the whole thing backwards for downloads.
//!
//! ## Example
//!
//! ```rust,ignore
//! use xet_client::{CasClient, Config, DownloadSession, UploadSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = CasClient::new(
//!         Config::new("https://cas.example.com").with_token("secret"),
//!     )?;
//!
//!     let mut session = UploadSession::new(&client);
//!     let file_hash = session.add_file(&std::fs::read("model.safetensors")?);
//!     session.upload().await?;
//!
//!     let bytes = DownloadSession::new(&client).download(&file_hash, None).await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod dedup;
mod download;
mod error;
mod types;
mod upload;

pub use client::{CasClient, ShardRegistration};
pub use config::Config;
pub use dedup::{ChunkLocation, DeduplicationCache};
pub use download::DownloadSession;
pub use error::{ClientError, Result};
pub use types::{ByteRange, ChunkRange, FetchInfo, ReconstructionResponse, ReconstructionTerm};
pub use upload::UploadSession;
