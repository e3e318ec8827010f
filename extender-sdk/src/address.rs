//! Network prefix helpers.
//!
//! The node renders addresses as `Mx` + 40 hex chars and validator public
//! keys as `Mp` + 64 hex chars. The store keeps both without the prefix.

/// Prefix of a wallet address.
pub const ADDRESS_PREFIX: &str = "Mx";

/// Prefix of a validator public key.
pub const PUBLIC_KEY_PREFIX: &str = "Mp";

/// Strip the address prefix if present.
///
/// Idempotent: an already-normalized address is returned unchanged.
pub fn remove_address_prefix(address: &str) -> &str {
    address.strip_prefix(ADDRESS_PREFIX).unwrap_or(address)
}

/// Strip the public key prefix if present.
pub fn remove_public_key_prefix(public_key: &str) -> &str {
    public_key
        .strip_prefix(PUBLIC_KEY_PREFIX)
        .unwrap_or(public_key)
}

/// Render a normalized address the way the node expects it.
pub fn with_address_prefix(address: &str) -> String {
    format!("{ADDRESS_PREFIX}{}", remove_address_prefix(address))
}
