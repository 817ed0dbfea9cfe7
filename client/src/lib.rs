//! # Tether Client
//!
//! Async shell around `tether-engine`: a [`LiveCollection`] subscribes to a
//! [`TransportChannel`], applies the notification stream to its ordered
//! mirror in a background task, and runs local mutations optimistically with
//! remote confirmation or rollback.
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tether_client::{LiveCollection, MemoryRemote, PushIdGenerator};
//!
//! # async fn demo() -> Result<(), tether_engine::Error> {
//! let remote = MemoryRemote::new();
//! let todos = LiveCollection::open(Arc::new(remote), PushIdGenerator::new());
//! todos.ready().await;
//!
//! let record = todos.add(json!({"title": "milk"})).await?;
//! todos.edit(record.id.as_str(), |draft| draft.set_field("done", json!(true)))?;
//! todos.save(record.id.as_str()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod handle;
pub mod keys;
pub mod live;
pub mod memory;
mod state;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use coordinator::MutationCoordinator;
pub use handle::CompletionHandle;
pub use keys::PushIdGenerator;
pub use live::LiveCollection;
pub use memory::MemoryRemote;
pub use transport::{NotificationStream, TransportChannel, TransportError};
