// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use hublink::config::ProvisionConfig;

#[tokio::main]
async fn main() {
    let config = ProvisionConfig::parse();
    hublink::init_tracing(&config);

    if let Err(e) = hublink::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
