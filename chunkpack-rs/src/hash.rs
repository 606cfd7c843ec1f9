use sha2::{Digest, Sha256};

/// Number of hex characters embedded in bundle file names.
pub const SHORT_HASH_LEN: usize = 8;

/// Hex encoded sha256 of the concatenation of `parts`.
pub fn compute_hash<I, T>(parts: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    format!("{:x}", hasher.finalize())
}

pub fn short_hash(hash: &str) -> &str {
    &hash[..SHORT_HASH_LEN.min(hash.len())]
}

/// `{stem}.bundle.{hash8}.js`
pub fn bundle_filename(stem: &str, hash: &str) -> String {
    format!("{stem}.bundle.{}.js", short_hash(hash))
}
