use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use fedsender_core::{Result, debug_info, err};
use rand::{Rng, distributions::Alphanumeric};
use ruma::signatures::Ed25519KeyPair;

/// Load the signing key document, generating one on first boot.
///
/// The file holds a single line: `ed25519 <version> <base64 pkcs8>`.
pub(super) fn init(path: &Path) -> Result<Ed25519KeyPair> {
	if path.exists() {
		return load(path);
	}

	let keypair = generate(path)?;
	debug_info!(?path, "generated new federation signing key");
	Ok(keypair)
}

fn load(path: &Path) -> Result<Ed25519KeyPair> {
	let content = std::fs::read_to_string(path)?;
	let mut fields = content.split_whitespace();

	match (fields.next(), fields.next(), fields.next()) {
		| (Some("ed25519"), Some(version), Some(document)) => {
			let document = STANDARD_NO_PAD
				.decode(document)
				.map_err(|e| err!(Config("signing_key_path", "undecodable key: {e}")))?;

			Ok(Ed25519KeyPair::from_der(&document, version.to_owned())?)
		},
		| _ => Err(err!(Config(
			"signing_key_path",
			"malformed signing key file {path:?}"
		))),
	}
}

fn generate(path: &Path) -> Result<Ed25519KeyPair> {
	let version: String = rand::thread_rng()
		.sample_iter(Alphanumeric)
		.take(8)
		.map(char::from)
		.collect();

	let document = Ed25519KeyPair::generate()?;
	let keypair = Ed25519KeyPair::from_der(&document, version.clone())?;

	let line = format!("ed25519 {version} {}\n", STANDARD_NO_PAD.encode(&document));
	std::fs::write(path, line)?;

	Ok(keypair)
}
