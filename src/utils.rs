//! Utility functions for identifiers

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Transaction id stamped on every write of one engine operation.
/// Falls back to the raw uuid7 text if bech32 encoding is unavailable.
pub fn new_tx_id() -> String {
    new_uuid_to_bech32("tx").unwrap_or_else(|_| uuid7().to_string())
}

/// Plain uuid7 text. Ids sort in creation order.
pub fn new_sortable_id() -> String {
    uuid7().to_string()
}
