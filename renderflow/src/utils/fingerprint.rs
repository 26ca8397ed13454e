//! Content fingerprints for audit trails.

use sha2::{Digest, Sha256};

/// Length of the hex prefix kept from the full digest.
const FINGERPRINT_LEN: usize = 12;

/// Returns a short hex fingerprint of the given bytes.
///
/// Used to tie audit log entries to the exact committed payload without
/// embedding the payload itself.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}
