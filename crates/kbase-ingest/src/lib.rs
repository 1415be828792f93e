//! kbase ingest: text extraction, chunking, object storage and the
//! all-or-nothing document ingestion service.

pub mod chunking;
pub mod file;
pub mod ingest;
pub mod storage;

pub use chunking::{RecursiveChunker, TextChunk};
pub use file::{extract_text, ExtractedText, FileType};
pub use ingest::{content_hash, Ingester, Upload};
pub use storage::{FsObjectStorage, ObjectStorage};
