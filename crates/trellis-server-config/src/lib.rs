// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the Trellis permission service.
//!
//! Sources are merged in precedence order: built-in defaults, then
//! `/etc/trellis/server.toml` (or a custom path), then `TRELLIS_SERVER_*`
//! environment variables.
//!
//! ```ignore
//! use trellis_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("database: {}", config.database.url);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub permissions: PermissionsConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	let mut merged = ServerConfigLayer::default();
	merged.merge(EnvSource.load()?);
	finalize(merged)
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let permissions = layer.permissions.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	validate_config(&permissions)?;

	info!(
		database = %database.url,
		max_traversal_depth = permissions.max_traversal_depth,
		resolve_timeout_ms = permissions.resolve_timeout_ms,
		cache_ttl_secs = permissions.cache_ttl_secs,
		root_deletion_policy = ?permissions.root_deletion_policy,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		database,
		permissions,
		logging,
	})
}

fn validate_config(permissions: &PermissionsConfig) -> Result<(), ConfigError> {
	if permissions.max_traversal_depth == 0 {
		return Err(ConfigError::Validation(
			"max_traversal_depth must be at least 1".to_string(),
		));
	}
	if permissions.resolve_timeout_ms == 0 {
		return Err(ConfigError::Validation(
			"resolve_timeout_ms must be greater than zero".to_string(),
		));
	}
	if permissions.cache_max_entries == 0 && permissions.cache_ttl_secs > 0 {
		return Err(ConfigError::Validation(
			"cache_max_entries is 0 but cache_ttl_secs is set; set cache_ttl_secs = 0 to disable caching"
				.to_string(),
		));
	}
	Ok(())
}
