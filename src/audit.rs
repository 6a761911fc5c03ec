//! Deterministic digests over persisted settlement rows.
//!
//! The settlement header stores a hash of its detail rows at save time;
//! retroactive edits refresh it. A mismatch against a recomputed hash
//! means the rows were changed outside the bulk updater.

use crate::billing::SettlementDetail;
use crate::sha256_digest;

/// SHA256 hash of data, lowercase hex.
pub fn audit_hash(data: &[u8]) -> String {
    hex::encode(sha256_digest(data))
}

/// Deterministic hash of a detail-row set (canonical bincode serialization,
/// rows in detail-id order).
pub fn detail_set_hash(rows: &[&SettlementDetail]) -> String {
    let mut sorted: Vec<&&SettlementDetail> = rows.iter().collect();
    sorted.sort_by_key(|d| d.id);
    let bytes: Vec<u8> = sorted
        .iter()
        .flat_map(|d| bincode::serialize(*d).unwrap_or_default())
        .collect();
    audit_hash(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{ConvertedUsage, CounterSnapshot};

    fn detail(id: u64, amount: u64) -> SettlementDetail {
        SettlementDetail {
            id,
            settlement_key: "org-1:c-1:2024:05".to_string(),
            asset_id: "m-1".to_string(),
            year: 2024,
            month: 5,
            prev: CounterSnapshot::zero(),
            curr: CounterSnapshot::new(100, 0, 0, 0),
            usage: CounterSnapshot::new(100, 0, 0, 0),
            converted: ConvertedUsage { bw: 100, col: 0 },
            amount,
            is_replacement_record: false,
            is_group_leader: true,
            group_span: 1,
            is_paid: false,
        }
    }

    #[test]
    fn test_audit_hash_deterministic() {
        let h1 = audit_hash(b"rows");
        let h2 = audit_hash(b"rows");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_detail_set_hash_order_independent() {
        let a = detail(0, 100);
        let b = detail(1, 200);
        let h1 = detail_set_hash(&[&a, &b]);
        let h2 = detail_set_hash(&[&b, &a]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_detail_set_hash_detects_change() {
        let a = detail(0, 100);
        let edited = detail(0, 999);
        assert_ne!(detail_set_hash(&[&a]), detail_set_hash(&[&edited]));
    }
}
