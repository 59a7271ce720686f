//! Logging and node configuration types.

/// Log level, independent of the `log` crate's so it round-trips cleanly
/// through `serde`/`toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
	/// Error
	Error,
	/// Warning
	Warning,
	/// Info
	Info,
	/// Debug
	Debug,
	/// Trace
	Trace,
}

/// Logging configuration: independent stdout/file sinks and levels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
	/// Whether to log to stdout.
	pub log_to_stdout: bool,
	/// Logging level for stdout.
	pub stdout_log_level: LogLevel,
	/// Whether to log to file.
	pub log_to_file: bool,
	/// Log file level.
	pub file_log_level: LogLevel,
	/// Log file path.
	pub log_file_path: String,
	/// Whether to append to the log file or replace it.
	pub log_file_append: bool,
	/// Size in bytes at which to rotate the log file (optional).
	pub log_max_size: Option<u64>,
}

impl Default for LoggingConfig {
	fn default() -> LoggingConfig {
		LoggingConfig {
			log_to_stdout: true,
			stdout_log_level: LogLevel::Info,
			log_to_file: false,
			file_log_level: LogLevel::Debug,
			log_file_path: String::from("bitnode.log"),
			log_file_append: true,
			log_max_size: Some(1024 * 1024 * 16),
		}
	}
}

/// Top-level node configuration. Deserializable from a TOML file; any
/// field omitted falls back to its `Default`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
	/// Size of the shared thread pool used for parallel tx confirmability.
	pub threads: usize,
	/// Heights at or below which non-malleability checks are skipped.
	pub bypass_height: u64,
	/// How many seconds behind wall-clock the tip may be and still be
	/// considered "current".
	pub currency_window: u32,
	/// Batch size used when pulling unassociated items from the archive.
	pub inventory: usize,
	/// Expected number of concurrent peer channels.
	pub channels: usize,
	/// Byte size of the block arena.
	pub arena_capacity: usize,
	/// Logging configuration.
	pub logging: LoggingConfig,
}

impl Default for NodeConfig {
	fn default() -> NodeConfig {
		NodeConfig {
			threads: 4,
			bypass_height: 0,
			currency_window: 24 * 60 * 60,
			inventory: 500,
			channels: 8,
			arena_capacity: 16 * 1024 * 1024,
			logging: LoggingConfig::default(),
		}
	}
}
