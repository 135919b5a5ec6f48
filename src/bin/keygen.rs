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

//! Stand-alone identity claim generator: computes the VDF proof for a handle
//! and writes `ember_identity.key` in the same shape [`ember::node`] loads,
//! so an operator can pre-mint an identity offline before first start.

use std::sync::Arc;

use anyhow::{Context, Result};
use ember::core::vdf::{TestVdfBackend, VdfBackend};
use ember::node::load_or_create_ember_identity;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let handle = args.next().context("usage: keygen <handle> [data_dir]")?;
    let data_dir = args.next().unwrap_or_else(|| "data".to_string());

    let vdf: Arc<dyn VdfBackend> = Arc::new(TestVdfBackend::default());
    let identity =
        load_or_create_ember_identity(&data_dir, &handle, vdf.as_ref()).context("generating identity")?;

    println!(
        "handle={} node_id={} data_dir={}",
        identity.claim.handle,
        identity.claim.node_id.to_hex(),
        data_dir
    );
    Ok(())
}
