use anyhow::Context;
use bulkops_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config; run `bulkops config init`")?;
    let port = port.unwrap_or(config.server.port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(bulkops_server::serve(root.to_path_buf(), port))
}
