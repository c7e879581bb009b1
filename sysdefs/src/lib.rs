//! System definitions shared by the storage planner crates.

pub mod filesystems;
pub mod partition_tables;
