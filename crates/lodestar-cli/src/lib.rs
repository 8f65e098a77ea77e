#![forbid(unsafe_code)]
#![allow(clippy::redundant_pub_crate)]

//! Terminal console that mirrors a qBittorrent-compatible daemon.
//!
//! Layout:
//! - `cli.rs`: argument parsing and command dispatch
//! - `commands/`: command handlers and the shared controller session
//! - `client.rs`: CLI errors and the connected application context
//! - `output.rs`: renderers and formatting helpers
//! - `main.rs`: thin entrypoint delegating to `run()`

pub(crate) mod cli;
pub(crate) mod client;
pub(crate) mod commands;
pub(crate) mod output;

pub use cli::run;
