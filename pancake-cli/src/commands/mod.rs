//! CLI subcommands

pub mod compile;
pub mod init;
pub mod schema;
