pub mod capabilities;
pub mod config;
pub mod fileops;
pub mod logging;
pub mod models;
pub mod notify;
pub mod orchestration;
pub mod persistence;
pub mod pipeline;
pub mod provider;
pub mod rpc;
pub mod sqlite;
pub mod undo;

pub use config::DaemonConfig;
pub use models::{CoreError, CoreErrorKind};
pub use orchestration::{QueueConfig, TaskQueue};
pub use rpc::{ControlMethods, ControlServer};
pub use sqlite::SqliteStore;
pub use undo::UndoLedger;
