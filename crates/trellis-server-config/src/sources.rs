// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};
use trellis_permissions_core::RootDeletionPolicy;

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{DatabaseConfigLayer, LoggingConfigLayer, PermissionsConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file yields an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/trellis/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: TRELLIS_SERVER_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(load_database_from_env()),
			permissions: Some(load_permissions_from_env()?),
			logging: Some(load_logging_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u32 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid usize value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn parse_deletion_policy(key: &str, value: &str) -> Result<RootDeletionPolicy, ConfigError> {
	match value.to_lowercase().as_str() {
		"detach" => Ok(RootDeletionPolicy::Detach),
		"reject" => Ok(RootDeletionPolicy::Reject),
		other => Err(ConfigError::InvalidValue {
			key: key.to_string(),
			message: format!("expected 'detach' or 'reject', got '{other}'"),
		}),
	}
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("TRELLIS_SERVER_DATABASE_URL"),
	}
}

fn load_permissions_from_env() -> Result<PermissionsConfigLayer, ConfigError> {
	const POLICY_KEY: &str = "TRELLIS_SERVER_ROOT_DELETION_POLICY";
	let root_deletion_policy = env_var(POLICY_KEY)
		.map(|v| parse_deletion_policy(POLICY_KEY, &v))
		.transpose()?;

	Ok(PermissionsConfigLayer {
		max_traversal_depth: env_usize("TRELLIS_SERVER_MAX_TRAVERSAL_DEPTH")?,
		resolve_timeout_ms: env_u64("TRELLIS_SERVER_RESOLVE_TIMEOUT_MS")?,
		cache_ttl_secs: env_u64("TRELLIS_SERVER_CACHE_TTL_SECS")?,
		cache_max_entries: env_usize("TRELLIS_SERVER_CACHE_MAX_ENTRIES")?,
		async_propagation_threshold: env_usize("TRELLIS_SERVER_ASYNC_PROPAGATION_THRESHOLD")?,
		propagation_max_retries: env_u32("TRELLIS_SERVER_PROPAGATION_MAX_RETRIES")?,
		propagation_base_delay_ms: env_u64("TRELLIS_SERVER_PROPAGATION_BASE_DELAY_MS")?,
		root_deletion_policy,
	})
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("TRELLIS_SERVER_LOG_LEVEL"),
	}
}
