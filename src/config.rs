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

//! Loading [`NodeConfig`] from an optional TOML file with environment
//! overrides, mirroring the teacher's flat `env()`-helper approach to
//! deployment configuration.

use thiserror::Error;

use crate::core::types::{HttpConfig, NodeConfig, NodeP2pConfig, NodeSettings, ProtocolConfig};

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML file existed but failed to parse.
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The file path was given but could not be read.
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
}

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn default_config() -> NodeConfig {
    NodeConfig {
        node: NodeSettings {
            name: env("EMBER_NODE_NAME", "ember-node"),
            data_dir: env("EMBER_DATA_DIR", "./data"),
            stateless: env_parsed("EMBER_STATELESS", false),
            handle: std::env::var("EMBER_HANDLE").ok(),
        },
        http: HttpConfig {
            listen_addr: env("EMBER_HTTP_LISTEN", "0.0.0.0:9090"),
        },
        p2p: NodeP2pConfig {
            listen_addr: env("EMBER_P2P_LISTEN", "/ip4/0.0.0.0/tcp/4001"),
            max_msg_per_sec: env_parsed("EMBER_RATE_LIMIT_MESSAGES", 50),
            max_peers: env_parsed("EMBER_MAX_PEERS", 64),
            bootstrap: env("EMBER_BOOTSTRAP", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        },
        protocol: ProtocolConfig::default(),
    }
}

/// Load node configuration: start from the named defaults above, overlay a
/// TOML file at `path` if given, then let `EMBER_*` environment variables
/// win over both. Environment variables are applied last so a deployment
/// can override a single field of a checked-in TOML file without editing it.
pub fn load(path: Option<&str>) -> Result<NodeConfig, ConfigError> {
    let mut cfg = default_config();

    if let Some(path) = path {
        let text = std::fs::read_to_string(path)?;
        let from_file: NodeConfig = toml::from_str(&text)?;
        cfg = from_file;
    }

    if let Ok(v) = std::env::var("EMBER_NODE_NAME") {
        cfg.node.name = v;
    }
    if let Ok(v) = std::env::var("EMBER_DATA_DIR") {
        cfg.node.data_dir = v;
    }
    if let Ok(v) = std::env::var("EMBER_STATELESS") {
        if let Ok(b) = v.parse() {
            cfg.node.stateless = b;
        }
    }
    if let Ok(v) = std::env::var("EMBER_HANDLE") {
        cfg.node.handle = Some(v);
    }
    if let Ok(v) = std::env::var("EMBER_HTTP_LISTEN") {
        cfg.http.listen_addr = v;
    }
    if let Ok(v) = std::env::var("EMBER_P2P_LISTEN") {
        cfg.p2p.listen_addr = v;
    }
    if let Ok(v) = std::env::var("EMBER_MAX_PEERS") {
        if let Ok(n) = v.parse() {
            cfg.p2p.max_peers = n;
        }
    }
    if let Ok(v) = std::env::var("EMBER_RATE_LIMIT_MESSAGES") {
        if let Ok(n) = v.parse() {
            cfg.p2p.max_msg_per_sec = n;
        }
    }
    if let Ok(v) = std::env::var("EMBER_BOOTSTRAP") {
        cfg.p2p.bootstrap = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let cfg = load(None).expect("defaults");
        assert!(!cfg.node.data_dir.is_empty());
        assert!(!cfg.p2p.listen_addr.is_empty());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ember.toml");
        std::fs::write(
            &path,
            r#"
            [node]
            name = "test-node"
            data_dir = "/tmp/ember-test"

            [http]
            listen_addr = "127.0.0.1:9999"

            [p2p]
            listen_addr = "/ip4/0.0.0.0/tcp/5001"
            max_msg_per_sec = 10
            max_peers = 8
            bootstrap = []

            [protocol]
            max_posts = 500
            max_post_size = 1120
            max_message_size = 1048576
            rate_limit_window_secs = 60
            rate_limit_messages = 50
            garbage_collect_interval_secs = 60
            carrier_update_interval_secs = 30
            trust_threshold = 30.0
            attestation_timeout_ms = 1000
            max_pending_messages = 100
            auto_carry_replies = false
            mix_min_delay_ms = 500
            mix_max_delay_ms = 5000
            mix_cover_traffic_interval_ms = 10000
            "#,
        )
        .unwrap();

        let cfg = load(Some(path.to_str().unwrap())).expect("load");
        assert_eq!(cfg.node.name, "test-node");
        assert_eq!(cfg.p2p.max_peers, 8);
        assert_eq!(cfg.protocol.max_posts, 500);
    }
}
