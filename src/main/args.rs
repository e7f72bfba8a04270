use std::path::PathBuf;

use clap::Parser;
use fedsender_core::{Result, config::Figment, err};
use figment::providers::Serialized;

/// Commandline arguments
#[derive(Clone, Debug, Parser)]
#[clap(version, about, long_about = None)]
pub struct Args {
	/// Path to the configuration file; repeatable, later files override
	/// earlier ones.
	#[arg(short, long)]
	pub config: Option<Vec<PathBuf>>,

	/// Override an individual configuration value: `-O key=value`;
	/// repeatable.
	#[arg(short = 'O', long = "option")]
	pub option: Vec<String>,
}

#[must_use]
pub fn parse() -> Args { Args::parse() }

/// Apply commandline overrides onto the raw configuration.
pub fn update(mut raw: Figment, args: &Args) -> Result<Figment> {
	for option in &args.option {
		let Some((key, value)) = option.split_once('=') else {
			return Err(err!(Config("-O", "expected key=value, got {option:?}")));
		};

		// numbers and booleans pass through typed; anything else is a string
		let value: figment::value::Value = serde_json::from_str(value)
			.unwrap_or_else(|_| figment::value::Value::from(value));

		raw = raw.merge(Serialized::global(key, value));
	}

	Ok(raw)
}
