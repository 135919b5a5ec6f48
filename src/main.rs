// Copyright (c) 2026 Ember
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Ember node entrypoint (systemd-friendly).
//! Loads configuration, assembles the node, and keeps the process alive
//! alongside its metrics/health server until terminated.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("EMBER_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .try_init();

    let config_path = std::env::var("EMBER_CONFIG").ok();
    let config = match ember::config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let metrics = Arc::new(ember::monitoring::metrics::Metrics::new().expect("metrics init failed"));

    info!(
        node = %config.node.name,
        handle = ?config.node.handle,
        p2p = %config.p2p.listen_addr,
        "ember node starting"
    );

    let node = match ember::node::Node::new(config.clone(), metrics.clone()).await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "failed to assemble node");
            std::process::exit(1);
        }
    };

    info!(node_id = %node.claim().node_id.to_hex(), handle = %node.claim().handle, "identity claimed");

    let metrics_task = tokio::spawn(ember::monitoring::serve(config.http.listen_addr.clone(), metrics));

    tokio::select! {
        res = node.run() => {
            if let Err(e) = res {
                error!(error = %e, "node exited with error");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    metrics_task.abort();
}
