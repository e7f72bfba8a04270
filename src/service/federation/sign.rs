use fedsender_core::{Result, err};
use ruma::{
	CanonicalJsonObject, CanonicalJsonValue, ServerName,
	signatures::{Ed25519KeyPair, sign_json},
};

/// Build the `X-Matrix` Authorization header for one federation request:
/// the ed25519 signature over `{method, uri, origin, destination,
/// content}` in canonical JSON.
pub(super) fn authorization(
	keypair: &Ed25519KeyPair,
	origin: &ServerName,
	destination: &ServerName,
	method: &str,
	uri: &str,
	content: &CanonicalJsonObject,
) -> Result<String> {
	let mut request: CanonicalJsonObject = [
		("content".to_owned(), CanonicalJsonValue::Object(content.clone())),
		("destination".to_owned(), CanonicalJsonValue::String(destination.as_str().to_owned())),
		("method".to_owned(), CanonicalJsonValue::String(method.to_owned())),
		("origin".to_owned(), CanonicalJsonValue::String(origin.as_str().to_owned())),
		("uri".to_owned(), CanonicalJsonValue::String(uri.to_owned())),
	]
	.into_iter()
	.collect();

	sign_json(origin.as_str(), keypair, &mut request)?;

	let (key_id, signature) = extract_signature(&request, origin)?;
	Ok(format!(
		"X-Matrix origin=\"{origin}\",destination=\"{destination}\",key=\"{key_id}\",sig=\"{signature}\"",
	))
}

fn extract_signature(
	request: &CanonicalJsonObject,
	origin: &ServerName,
) -> Result<(String, String)> {
	let Some(CanonicalJsonValue::Object(signatures)) = request.get("signatures") else {
		return Err(err!("signed request carries no signatures object"));
	};

	let Some(CanonicalJsonValue::Object(our_signatures)) = signatures.get(origin.as_str())
	else {
		return Err(err!("signed request carries no signature for {origin}"));
	};

	our_signatures
		.iter()
		.find_map(|(key_id, sig)| match sig {
			| CanonicalJsonValue::String(sig) => Some((key_id.clone(), sig.clone())),
			| _ => None,
		})
		.ok_or_else(|| err!("signature for {origin} is not a string"))
}
