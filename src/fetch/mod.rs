//! Registry ingestion: sources, dump parsing, and the multi-source client.

pub mod client;
pub mod mirror;
pub mod official;
pub mod parser;
pub mod source;

pub use client::RegistryClient;
pub use mirror::MirrorSource;
pub use official::OfficialSource;
pub use parser::Parser;
pub use source::{Source, SourceConfig};
