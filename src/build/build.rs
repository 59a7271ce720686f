//! Build hooks to spit out version+build time info

use std::env;

fn main() {
	let mut opts = built::Options::default();
	opts.set_dependencies(true);
	built::write_built_file_with_opts(
		&opts,
		env!("CARGO_MANIFEST_DIR"),
		&format!("{}{}", env::var("OUT_DIR").unwrap(), "/built.rs"),
	)
	.expect("Failed to acquire build-time information");
}
