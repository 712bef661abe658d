//! Persistence for generated tools and the append-only evolution audit log.
//!
//! [`ToolStore`] is the seam the registry and orchestrator talk to.
//! [`InMemoryStore`] backs tests and throwaway servers; [`FileStore`] keeps a
//! JSON lines file that is replayed on start-up.

#![warn(missing_docs, clippy::pedantic)]

mod error;
pub mod file;
pub mod memory;
pub mod record;
mod state;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use record::{
    CreationStage, GeneratedTool, GeneratedToolPatch, LogFilter, NewGeneratedTool, SourceType,
    StageStatus, ToolCreationLog, ToolCreationLogBuilder, ToolStatus,
};
pub use store::ToolStore;
