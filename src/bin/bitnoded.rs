// Copyright 2024 The Bitnode Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Launcher binary: reads configuration, wires a [`Node`] over an
//! [`Archive`], and drives it until told to stop.
//!
//! The archive implementation here is [`MemoryArchive`] — there is no
//! on-disk store in this crate, only the seam it would plug into. A real
//! deployment swaps that one line for a persistent implementation.

use std::fs;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{App, Arg};
use log::{error, info, warn};

use bitnode_core::hash::ZERO_HASH;
use bitnode_core::{Block, BlockHeader, Transaction};
use bitnode_chain::Node;
use bitnode_store::{Archive, MemoryArchive};
use bitnode_util::{init_logger, NodeConfig};

fn main() {
	let matches = App::new("bitnoded")
		.version(built_info::PKG_VERSION)
		.about("Candidate-chain progression core for a Bitcoin full node")
		.arg(
			Arg::with_name("config")
				.short("c")
				.long("config")
				.value_name("FILE")
				.help("Path to a TOML config file; defaults are used for anything it omits")
				.takes_value(true),
		)
		.get_matches();

	let config = read_config(matches.value_of("config"));
	if let Err(e) = init_logger(Some(config.logging.clone())) {
		eprintln!("failed to initialize logging: {}", e);
		exit(1);
	}

	info!("starting bitnoded {}", built_info::PKG_VERSION);

	let archive: Arc<dyn Archive> = Arc::new(MemoryArchive::new(genesis_block()));
	let node = Arc::new(Node::new(archive, &config));
	if let Err(e) = node.start() {
		error!("failed to start node: {}", e);
		exit(1);
	}

	let running = Arc::new(AtomicBool::new(true));
	let r = running.clone();
	ctrlc::set_handler(move || {
		r.store(false, Ordering::SeqCst);
	})
	.expect("error setting handler for SIGINT/SIGTERM");

	while running.load(Ordering::SeqCst) {
		if let Err(e) = node.run() {
			error!("pipeline round failed: {}", e);
			node.fault(format!("{}", e));
			break;
		}
		if node.is_closed() {
			break;
		}
		thread::sleep(Duration::from_millis(200));
	}

	warn!("shutting down");
	node.close();
}

fn read_config(path: Option<&str>) -> NodeConfig {
	let path = match path {
		Some(p) => PathBuf::from(p),
		None => return NodeConfig::default(),
	};
	match fs::read_to_string(&path) {
		Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
			eprintln!("failed to parse {}: {}, using defaults", path.display(), e);
			NodeConfig::default()
		}),
		Err(e) => {
			eprintln!("failed to read {}: {}, using defaults", path.display(), e);
			NodeConfig::default()
		}
	}
}

/// The genesis block every fresh archive is seeded with. Real consensus
/// parameters (the mainnet genesis hash and coinbase) are out of scope —
/// this is a placeholder root for the candidate/confirmed chains to hang
/// off of.
fn genesis_block() -> Block {
	Block {
		header: BlockHeader {
			previous: ZERO_HASH,
			height: 0,
			time: 0,
			bits: 0x1d00_ffff,
			nonce: 0,
			merkle_root: ZERO_HASH,
			witness_commitment: None,
		},
		txs: vec![Transaction {
			txid: ZERO_HASH,
			wtxid: ZERO_HASH,
			is_coinbase: true,
		}],
	}
}

mod built_info {
	include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
