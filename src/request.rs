//! Read and validate job request messages

/// Typed job request
pub mod job;
/// Embedded JSON schema for job requests
pub mod schema;
/// Read a request from disk and validate it against the schema
pub mod message;
/// Find request messages in a directory
pub mod read;
