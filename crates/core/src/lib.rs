//! Shared vocabulary of the raubzug work-stealing runtime: identities,
//! the task record, the fault-tolerance result table, errors and config.

pub mod config;
pub mod error;
pub mod ids;
pub mod table;
pub mod task;

pub use config::RaubzugConfig;
pub use error::RaubzugError;
pub use ids::{ClusterName, PeerId, Stamp, StampGenerator};
pub use table::{ResultTable, TableEntry};
pub use task::{RemoteException, Task, TaskOutcome};
