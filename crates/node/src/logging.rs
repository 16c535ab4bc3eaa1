// Copyright 2025 itscheems
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

//! Logging initialization for a bazaar node
//!
//! File output with daily rotation, console output opt-in.
//!
//! Environment variables:
//! - `RUST_LOG`: level filter (default `info`), per-module syntax
//!   supported (`RUST_LOG=bazaar_swap=debug,info`)
//! - `LOG_DIR`: root directory for log files (default `./logs`);
//!   files land in `{LOG_DIR}/{component}/{component}.{date}.log`
//! - `LOG_TO_CONSOLE`: `true`/`1`/`yes` additionally logs to stderr

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::{
	non_blocking,
	rolling::{self, Rotation},
};
use tracing_subscriber::{
	EnvFilter, fmt, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt,
};

// Keeps the non-blocking writer flushing until process exit
static LOG_GUARD: OnceLock<non_blocking::WorkerGuard> = OnceLock::new();

/// Initialize logging for the given component name
///
/// Call once, before the node starts; a second call fails because the
/// global subscriber is already set.
pub fn init_logging(component: &str) -> Result<()> {
	dotenv::dotenv().ok();

	let log_root = env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
	let log_dir = Path::new(&log_root).join(component);
	std::fs::create_dir_all(&log_dir)
		.with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

	let file_appender = rolling::RollingFileAppender::builder()
		.rotation(Rotation::DAILY)
		.filename_prefix(component.to_string())
		.filename_suffix("log")
		.build(&log_dir)
		.with_context(|| {
			format!(
				"Failed to create rolling file appender in {}",
				log_dir.display()
			)
		})?;
	let (file_writer, guard) = non_blocking(file_appender);
	LOG_GUARD.set(guard).ok();

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let log_to_console = env::var("LOG_TO_CONSOLE")
		.map(|v| v == "true" || v == "1" || v == "yes")
		.unwrap_or(false);

	let subscriber = Registry::default().with(filter).with(
		fmt::layer()
			.with_writer(file_writer)
			.with_target(true)
			.with_ansi(false),
	);

	if log_to_console {
		subscriber
			.with(fmt::layer().with_writer(std::io::stderr).with_ansi(true))
			.init();
	} else {
		subscriber.init();
	}

	info!("Log directory: {}", log_dir.display());
	if log_to_console {
		info!("Console output: enabled");
	}

	Ok(())
}
