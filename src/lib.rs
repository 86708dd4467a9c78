//! Molecular docking pipeline
//!
//! Fetches a ligand, a receptor and a binding-site box from object storage, prepares both
//! molecules with external tools, docks, exports the pose and publishes the results.

/// Storage backend selection
pub mod backend;
/// External process execution
pub mod command;
/// SQLite job ledger
pub mod db;
/// Job orchestration
pub mod pipeline;
/// Job request messages
pub mod request;
/// Pipeline stages wrapping the external tools
pub mod stages;
/// Remote object storage
pub mod storage;
/// Per-job scratch directory
pub mod workspace;
