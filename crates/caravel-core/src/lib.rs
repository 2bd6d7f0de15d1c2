//! Caravel - a migration engine for experiment tracking data.
//!
//! Pulls workspaces, projects, experiments, artifacts and registered
//! models out of vendor tracking services into a plain on-disk mirror,
//! and pushes stored copies (or lightweight symlink references) into a
//! destination service. The engine only ever sees the
//! [`backend::Backend`] trait; vendor peculiarities stay inside the
//! adapters.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use caravel_core::store::{LayoutMode, LocalStore, NamingMode};
//! use caravel_core::{Migrator, NativeBackend, NativeConfig};
//!
//! #[tokio::main]
//! async fn main() -> caravel_core::Result<()> {
//!     let api_key = std::env::var("TRACKING_API_KEY").unwrap();
//!     let source = Arc::new(NativeBackend::new(NativeConfig::new(
//!         "https://tracking.example.com",
//!         api_key,
//!     ))?);
//!     let store = LocalStore::new("./mirror", LayoutMode::Nested, NamingMode::ById)?;
//!     let migrator = Migrator::builder().source(source).store(store).build()?;
//!
//!     let report = migrator
//!         .pull(&"team/vision".parse()?, Default::default())
//!         .await?;
//!     print!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cancel;
pub mod config;
pub mod error;
pub mod locator;
pub mod migrate;
pub mod network;
pub mod pull;
pub mod push;
pub mod report;
pub mod resources;
pub mod store;
pub mod walk;

// Re-export commonly used types
pub use backend::{
    Backend, DynBackend, EntitySnapshot, GridRunBackend, GridRunConfig, NativeBackend,
    NativeConfig, ProjectSeed, RemoteEntity, ResourceFile, ResourcePayload, SyncLedger,
    SyncWatermark, TransferFilter,
};
pub use cancel::{CancellationToken, CancelledError};
pub use error::{CaravelError, ErrorKind, Result};
pub use locator::{EntityKind, Locator};
pub use migrate::{Migrator, MigratorBuilder, SyncScope};
pub use pull::{PullOptions, PullPipeline};
pub use push::{PushOptions, PushPipeline, PushRequest};
pub use report::{MigrationReport, Outcome, ReportEntry, ReportSummary, SkipReason};
pub use resources::{ResourceScope, ResourceSelection, ResourceType};
pub use store::{LayoutMode, LocalStore, NamingMode, StoredEntity};
pub use walk::{EntityWalker, MigrationEstimate, WalkItem};
