// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator tooling for the Trellis permission engine.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis_permissions_core::{Actor, ResourceId, ResourceType, SpaceId, SubscriptionTier, UserId};
use trellis_server_permissions::{
	InMemorySpaceMembership, InMemoryWorkflowProgression, PermissionService,
};

/// trellis-admin - inspect and repair permission data.
#[derive(Parser, Debug)]
#[command(name = "trellis-admin", about = "Trellis permission engine tooling", version)]
struct Args {
	/// Config file to use instead of /etc/trellis/server.toml
	#[arg(long, env = "TRELLIS_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Create or upgrade the database schema
	Migrate,

	/// Recompute inherited rows under a resource
	Resync { resource_id: ResourceId },

	/// Print the effective permission rows of a resource as JSON
	List { resource_id: ResourceId },

	/// Print a user's role ids in a space
	Roles { space_id: SpaceId, user_id: UserId },

	/// Resolve the operations an actor holds on a resource
	Check {
		resource_type: ResourceType,
		resource_id: ResourceId,

		/// Resolve as this user instead of an anonymous visitor
		#[arg(long)]
		user: Option<UserId>,

		/// Treat the user as a space admin
		#[arg(long, requires = "user")]
		admin: bool,

		/// Treat the user as a member of this space
		#[arg(long, requires = "user")]
		member_of: Option<SpaceId>,

		/// Current evaluation step index, for proposals
		#[arg(long)]
		step: Option<u32>,

		/// Subscription tier of the resource's space
		#[arg(long, requires = "tier_space")]
		tier: Option<SubscriptionTier>,

		/// Space the --tier flag applies to
		#[arg(long)]
		tier_space: Option<SpaceId>,
	},

	/// List the resources of a type an actor can read in a space
	Accessible {
		resource_type: ResourceType,
		space_id: SpaceId,

		#[arg(long)]
		user: Option<UserId>,

		/// Treat the user as a member of the space
		#[arg(long, requires = "user")]
		member: bool,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let config = match &args.config {
		Some(path) => trellis_server_config::load_config_with_file(path),
		None => trellis_server_config::load_config(),
	}
	.context("loading configuration")?;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	let pool = trellis_server_db::create_pool(&config.database.url)
		.await
		.with_context(|| format!("opening database {}", config.database.url))?;

	if let Command::Migrate = args.command {
		trellis_server_db::run_migrations(&pool).await?;
		tracing::info!(database = %config.database.url, "migrations applied");
		return Ok(());
	}

	let membership = Arc::new(InMemorySpaceMembership::new());
	let progression = Arc::new(InMemoryWorkflowProgression::new());
	let service = PermissionService::new(
		pool,
		config.permissions.clone(),
		membership.clone(),
		progression.clone(),
	);

	match args.command {
		Command::Migrate => {}
		Command::Resync { resource_id } => {
			let report = service.resync_subtree(resource_id).await?;
			println!("{}", serde_json::to_string_pretty(&report)?);
		}
		Command::List { resource_id } => {
			let effective = service.list_effective_permissions(resource_id).await?;
			println!("{}", serde_json::to_string_pretty(&effective)?);
		}
		Command::Roles { space_id, user_id } => {
			let mut roles: Vec<_> = service
				.roles_for_user(space_id, Some(user_id))
				.await?
				.into_iter()
				.collect();
			roles.sort();
			for role in roles {
				println!("{role}");
			}
		}
		Command::Check {
			resource_type,
			resource_id,
			user,
			admin,
			member_of,
			step,
			tier,
			tier_space,
		} => {
			let actor = match (user, admin) {
				(Some(user_id), true) => Actor::admin(user_id),
				(Some(user_id), false) => Actor::user(user_id),
				(None, true) => bail!("--admin needs --user"),
				(None, false) => Actor::anonymous(),
			};
			if let (Some(space_id), Some(user_id)) = (member_of, user) {
				membership.add_member(space_id, user_id);
			}
			if let Some(index) = step {
				progression.set_current_step(resource_id, index);
			}
			if let (Some(tier), Some(space_id)) = (tier, tier_space) {
				membership.set_tier(space_id, tier);
			}

			let operations = service.resolve(resource_type, resource_id, &actor).await?;
			tracing::debug!(actor = %actor.key(), count = operations.len(), "resolved");
			if operations.is_empty() {
				println!("(no operations)");
			}
			for name in operations.names() {
				println!("{name}");
			}
		}
		Command::Accessible {
			resource_type,
			space_id,
			user,
			member,
		} => {
			let actor = user.map(Actor::user).unwrap_or_else(Actor::anonymous);
			if let (true, Some(user_id)) = (member, user) {
				membership.add_member(space_id, user_id);
			}
			let ids = service
				.accessible_resource_ids(resource_type, space_id, &actor)
				.await
				.with_context(|| format!("listing {resource_type} resources in {space_id}"))?;
			for id in ids {
				println!("{id}");
			}
		}
	}

	Ok(())
}
