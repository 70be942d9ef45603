//! # ApprovalFlow Store
//!
//! Storage backends for the ApprovalFlow engine.
//!
//! ## Features
//!
//! - In-memory task and instance store
//! - File-based task and instance store, one JSON file per record
//! - Definition registry fed from configuration
//! - Static user directory fed from configuration

pub mod directory;
pub mod file;
pub mod memory;
pub mod registry;

pub use directory::StaticUserDirectory;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use registry::DefinitionRegistry;
