//! The SQLite schema backing the Registry, loaded as an `include_str!`'d
//! file the same way the startup migration embeds it.

pub static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));
