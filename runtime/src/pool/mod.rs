//! Browser page pooling.

pub mod manager;
