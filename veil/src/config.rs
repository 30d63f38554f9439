//! Validated runtime configuration, derived from the CLI.

use crate::cli::{Cli, CodecStrategy};
use http::Uri;
use std::net::SocketAddr;
use std::path::PathBuf;
use veil_core::index::IndexConfig;

#[derive(Debug)]
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub upstream: Uri,
    pub descriptor_set: PathBuf,
    pub index: IndexConfig,
    pub codec: CodecStrategy,
}

impl ProxyConfig {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        anyhow::ensure!(
            cli.descriptor_set.is_file(),
            "descriptor set file does not exist: {}",
            cli.descriptor_set.display()
        );

        let upstream: Uri = cli
            .upstream
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid upstream URI '{}': {e}", cli.upstream))?;

        // The authority and scheme are reused on every forwarded request, so
        // bail early if they are not set.
        anyhow::ensure!(upstream.scheme().is_some(), "missing scheme in upstream URI");
        anyhow::ensure!(
            upstream.authority().is_some(),
            "missing authority in upstream URI"
        );
        anyhow::ensure!(
            upstream.path() == "/" && upstream.query().is_none(),
            "upstream URI must not carry a path or query: {upstream}"
        );

        Ok(Self {
            listen: cli.listen,
            upstream,
            descriptor_set: cli.descriptor_set,
            index: IndexConfig {
                scan_package_prefix: cli.scan_package_prefix,
                exclude_search_attributes: !cli.include_search_attributes,
            },
            codec: cli.codec,
        })
    }
}
