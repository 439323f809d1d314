use crate::crypto::access_token::AccessClaims;
use crate::crypto::secret::{derive_binding_signature, signatures_match, verify_refresh_secret};
use crate::error::Result;
use crate::models::session::SessionRecord;

/// Checks that `refresh_secret` is the plaintext behind `record` and that
/// `claims` were minted together with it.
///
/// Both checks always run, and the caller learns only the combined outcome.
pub fn verify_pair(
    record: &SessionRecord,
    refresh_secret: &str,
    claims: &AccessClaims,
) -> Result<bool> {
    let hash_ok = verify_refresh_secret(refresh_secret, &record.refresh_secret_hash)?;
    let binding_ok = signatures_match(
        &derive_binding_signature(refresh_secret),
        &claims.refresh_sig,
    );

    if !(hash_ok && binding_ok) {
        tracing::debug!(
            "Pair rejected for {} (hash: {}, binding: {})",
            record.identity,
            hash_ok,
            binding_ok
        );
    }

    Ok(hash_ok && binding_ok)
}

/// Whether the device presenting the pair is the one it was issued to.
pub fn verify_device_context(record: &SessionRecord, device_fingerprint: &str) -> bool {
    record.device_fingerprint == device_fingerprint
}

/// Whether the request comes from the network origin seen at issuance.
pub fn verify_network_origin(record: &SessionRecord, network_origin: &str) -> bool {
    record.network_origin == network_origin
}
