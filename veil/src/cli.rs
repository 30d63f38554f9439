//! # CLI
//!
//! Command-line interface of the `veil` proxy, defined with `clap`. Every
//! runtime setting is a flag; there is no configuration file.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "veil", version, about = "Transparent payload-transforming proxy")]
pub struct Cli {
    /// Address to accept client connections on
    #[arg(long, short = 'l', default_value = "127.0.0.1:8233")]
    pub listen: SocketAddr,

    /// Upstream workflow service URI (e.g. http://localhost:7233)
    #[arg(long, short = 'u')]
    pub upstream: String,

    /// Path to the serialized file descriptor set (.bin)
    #[arg(long, short = 'd', value_name = "FILE")]
    pub descriptor_set: PathBuf,

    /// Package prefix scanned for payload-bearing message types
    #[arg(long, default_value = "temporal.api.")]
    pub scan_package_prefix: String,

    /// Also transform payloads inside search attributes (they are excluded
    /// by default so the upstream can keep indexing them)
    #[arg(long)]
    pub include_search_attributes: bool,

    /// Payload codec strategy
    #[arg(long, value_enum, default_value = "inline")]
    pub codec: CodecStrategy,
}

/// Which codec implementation handles intercepted payloads.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecStrategy {
    /// Pass payloads through unchanged (wiring verification)
    Inline,
    /// Externalize payload data with one batched store round-trip per call
    Batched,
}
