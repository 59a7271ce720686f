//! Logging wrapper used throughout the workspace. Initializes `log4rs`
//! from a [`LoggingConfig`] exactly once; later calls are a harmless no-op
//! so library code (and tests) can call it defensively.

use parking_lot::Mutex;

use lazy_static::lazy_static;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::append::rolling_file::{
	policy::compound::roll::fixed_window::FixedWindowRoller,
	policy::compound::trigger::size::SizeTrigger, policy::compound::CompoundPolicy,
	RollingFileAppender,
};
use log4rs::append::Append;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;

use crate::types::{LogLevel, LoggingConfig};

const LOGGING_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l})} {M} - {m}{n}";

lazy_static! {
	static ref WAS_INIT: Mutex<bool> = Mutex::new(false);
}

fn convert_log_level(level: &LogLevel) -> LevelFilter {
	match level {
		LogLevel::Error => LevelFilter::Error,
		LogLevel::Warning => LevelFilter::Warn,
		LogLevel::Info => LevelFilter::Info,
		LogLevel::Debug => LevelFilter::Debug,
		LogLevel::Trace => LevelFilter::Trace,
	}
}

/// Initializes the process-wide logger from `config`, or from
/// [`LoggingConfig::default`] when `None`. Safe to call more than once
/// (e.g. from multiple test modules); only the first call takes effect.
pub fn init_logger(config: Option<LoggingConfig>) {
	let mut was_init = WAS_INIT.lock();
	if *was_init {
		return;
	}

	let config = config.unwrap_or_default();
	let level_stdout = convert_log_level(&config.stdout_log_level);
	let level_file = convert_log_level(&config.file_log_level);
	let level_minimum = level_stdout.max(level_file);

	let mut root = Root::builder();
	let mut appenders = Vec::new();

	if config.log_to_stdout {
		let stdout = ConsoleAppender::builder()
			.encoder(Box::new(PatternEncoder::new(LOGGING_PATTERN)))
			.build();
		appenders.push(
			Appender::builder()
				.filter(Box::new(ThresholdFilter::new(level_stdout)))
				.build("stdout", Box::new(stdout)),
		);
		root = root.appender("stdout");
	}

	if config.log_to_file {
		let file: Box<dyn Append> = if let Some(size) = config.log_max_size {
			let roller = FixedWindowRoller::builder()
				.build(&format!("{}.{{}}.gz", config.log_file_path), 32)
				.expect("failed to build log roller");
			let trigger = SizeTrigger::new(size);
			let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));
			Box::new(
				RollingFileAppender::builder()
					.append(config.log_file_append)
					.encoder(Box::new(PatternEncoder::new(LOGGING_PATTERN)))
					.build(&config.log_file_path, Box::new(policy))
					.expect("failed to build rolling file appender"),
			)
		} else {
			Box::new(
				FileAppender::builder()
					.append(config.log_file_append)
					.encoder(Box::new(PatternEncoder::new(LOGGING_PATTERN)))
					.build(&config.log_file_path)
					.expect("failed to build file appender"),
			)
		};
		appenders.push(
			Appender::builder()
				.filter(Box::new(ThresholdFilter::new(level_file)))
				.build("file", file),
		);
		root = root.appender("file");
	}

	let log_config = appenders
		.into_iter()
		.fold(Config::builder(), |builder, appender| {
			builder.appender(appender)
		})
		.build(root.build(level_minimum))
		.expect("failed to build log4rs config");

	log4rs::init_config(log_config).expect("failed to initialize logger");
	*was_init = true;
}

/// Initializes a minimal stdout-only logger at `Debug`, for test binaries
/// that want readable output without a config file.
pub fn init_test_logger() {
	init_logger(Some(LoggingConfig {
		log_to_stdout: true,
		stdout_log_level: LogLevel::Debug,
		log_to_file: false,
		..LoggingConfig::default()
	}));
}
