use anyhow::{Context, Result, bail};
use log::{LevelFilter, info};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

const FALLBACK_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:5})} [{T}] {t} - {m}{n}";

/// Install the log4rs configuration from `logging_config.yaml`.
pub fn init_logging<P: AsRef<Path>>(config_path: P) -> Result<()> {
	let path = config_path.as_ref();
	if !path.exists() {
		bail!("Logging configuration not found: {}", path.display());
	}
	log4rs::init_file(path, Default::default())
		.with_context(|| format!("Failed to load logging config {}", path.display()))?;
	info!("Logging configured from {}", path.display());
	Ok(())
}

/// Plain stderr logging at `level`, used when the YAML configuration is
/// missing or broken so that startup diagnostics still reach the console.
pub fn init_console_logging(level: LevelFilter) -> Result<()> {
	let stderr = ConsoleAppender::builder()
		.target(Target::Stderr)
		.encoder(Box::new(PatternEncoder::new(FALLBACK_PATTERN)))
		.build();
	let config = Config::builder()
		.appender(Appender::builder().build("stderr", Box::new(stderr)))
		.build(Root::builder().appender("stderr").build(level))
		.context("Invalid console logging configuration")?;
	log4rs::init_config(config).context("A logger is already installed")?;
	info!("Console logging initialized at {}", level);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_missing_logging_config_is_error() {
		let err = init_logging("/nonexistent/logging_config.yaml").unwrap_err();
		assert!(err.to_string().contains("not found"));
	}

	#[test]
	fn test_broken_logging_config_is_error() {
		let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
		std::io::Write::write_all(&mut file, b"appenders: [not, a, map]\n").unwrap();
		let err = init_logging(file.path()).unwrap_err();
		assert!(format!("{:#}", err).contains("Failed to load logging config"));
	}
}
