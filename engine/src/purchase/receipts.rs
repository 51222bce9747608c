//! Receipt aggregation.
//!
//! Each receipt response is a full snapshot of the account, so a merge
//! replaces the held list wholesale and re-sorts it: newest purchase first.
//! Ties on the purchase date are broken by receipt uuid so the order is
//! total and merging is idempotent.

use std::cmp::Ordering;

use parking_lot::RwLock;

use super::types::Receipt;

/// Newest-first ordering with a uuid tiebreak.
fn newest_first(a: &Receipt, b: &Receipt) -> Ordering {
    b.purchase_date
        .cmp(&a.purchase_date)
        .then_with(|| a.uuid.cmp(&b.uuid))
}

/// Sort `receipts` into the user-facing order in place.
pub fn order_receipts(receipts: &mut [Receipt]) {
    receipts.sort_by(newest_first);
}

/// Owns the canonical ordered receipt list.
#[derive(Debug, Default)]
pub struct ReceiptAggregator {
    receipts: RwLock<Vec<Receipt>>,
}

impl ReceiptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held list with `incoming` and return the ordered result.
    pub fn merge(&self, mut incoming: Vec<Receipt>) -> Vec<Receipt> {
        order_receipts(&mut incoming);
        let mut held = self.receipts.write();
        *held = incoming;
        held.clone()
    }

    /// The current ordered list.
    pub fn snapshot(&self) -> Vec<Receipt> {
        self.receipts.read().clone()
    }

    pub fn len(&self) -> usize {
        self.receipts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn receipt(id: &str, y: i32, m: u32, d: u32) -> Receipt {
        Receipt {
            identifier: id.to_string(),
            purchase_date: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
            uuid: format!("{id}-{y}{m:02}{d:02}"),
            price_in_cents: 100,
        }
    }

    #[test]
    fn merge_orders_newest_first() {
        let agg = ReceiptAggregator::new();
        let merged = agg.merge(vec![
            receipt("a", 2024, 1, 1),
            receipt("b", 2024, 3, 5),
            receipt("c", 2024, 2, 10),
        ]);
        let dates: Vec<String> = merged
            .iter()
            .map(|r| r.purchase_date.format("%Y-%m-%d").to_string())
            .collect();
        assert_eq!(dates, vec!["2024-03-05", "2024-02-10", "2024-01-01"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let agg = ReceiptAggregator::new();
        let input = vec![
            receipt("a", 2024, 1, 1),
            receipt("b", 2024, 3, 5),
            receipt("c", 2024, 2, 10),
        ];
        let once = agg.merge(input);
        let twice = agg.merge(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_replaces_rather_than_appends() {
        let agg = ReceiptAggregator::new();
        agg.merge(vec![receipt("a", 2024, 1, 1), receipt("b", 2024, 1, 2)]);
        let merged = agg.merge(vec![receipt("c", 2024, 5, 1)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(agg.snapshot(), merged);
    }

    #[test]
    fn equal_dates_order_by_uuid() {
        let mut first = receipt("a", 2024, 1, 1);
        first.uuid = "z".into();
        let mut second = receipt("b", 2024, 1, 1);
        second.uuid = "a".into();

        let agg = ReceiptAggregator::new();
        let forward = agg.merge(vec![first.clone(), second.clone()]);
        let backward = agg.merge(vec![second, first]);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].uuid, "a");
    }

    #[test]
    fn empty_merge_clears() {
        let agg = ReceiptAggregator::new();
        agg.merge(vec![receipt("a", 2024, 1, 1)]);
        assert!(agg.merge(Vec::new()).is_empty());
        assert!(agg.is_empty());
    }
}
