//! # netloom demos
//!
//! An echo server and a line client built on the netloom crates.
//!
//! ```bash
//! cargo run --example echo_server -- --port 8080
//! cargo run --example line_client -- --port 8080
//! ```
//!
//! Use `--udp` on both to run over datagrams, `--debug --log-level trace` to see every
//! chain event.

#![warn(rust_2018_idioms)]

pub mod helpers;
