//! Database layer - connection, destination tables, and the batch writer

pub mod connection;
pub mod schema;
pub mod writer;

pub use connection::Connection;
pub use writer::{BatchWriter, ConflictPolicy};
