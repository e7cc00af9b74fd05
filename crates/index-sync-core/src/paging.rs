//! Page partition arithmetic for batch rebuilds.

use std::ops::Range;

/// Splits `total` records into pages of `page_size`.
///
/// Page `k` covers the half-open offset range `[k·P, min((k+1)·P, C))`.
/// Pages `0..page_count()` cover `[0, C)` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    total: u64,
    page_size: u64,
}

impl PagePlan {
    /// `page_size` of zero is clamped to one.
    pub fn new(total: u64, page_size: u64) -> Self {
        Self {
            total,
            page_size: page_size.max(1),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn page_count(&self) -> u64 {
        self.total.div_ceil(self.page_size)
    }

    /// Offset range of `page`; empty when the page is past the end.
    pub fn range(&self, page: u64) -> Range<u64> {
        let start = page.saturating_mul(self.page_size).min(self.total);
        let end = start.saturating_add(self.page_size).min(self.total);
        start..end
    }

    /// Whether `page` is the final page of the plan.
    pub fn is_last(&self, page: u64) -> bool {
        page + 1 >= self.page_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_120_records_page_size_50() {
        let plan = PagePlan::new(120, 50);
        assert_eq!(plan.page_count(), 3);
        assert_eq!(plan.range(0), 0..50);
        assert_eq!(plan.range(1), 50..100);
        assert_eq!(plan.range(2), 100..120);
        assert!(plan.is_last(2));
        assert!(!plan.is_last(1));
    }

    #[test]
    fn test_partition_covers_every_offset_once() {
        for total in [0u64, 1, 49, 50, 51, 99, 100, 101, 997] {
            for size in [1u64, 7, 50, 1000] {
                let plan = PagePlan::new(total, size);
                let mut next = 0;
                for page in 0..plan.page_count() {
                    let r = plan.range(page);
                    assert_eq!(r.start, next, "gap or overlap at page {page} (C={total}, P={size})");
                    assert!(!r.is_empty());
                    next = r.end;
                }
                assert_eq!(next, total);
            }
        }
    }

    #[test]
    fn test_empty_total_has_no_pages() {
        let plan = PagePlan::new(0, 50);
        assert_eq!(plan.page_count(), 0);
        assert!(plan.range(0).is_empty());
    }

    #[test]
    fn test_zero_page_size_clamped() {
        let plan = PagePlan::new(3, 0);
        assert_eq!(plan.page_size(), 1);
        assert_eq!(plan.page_count(), 3);
    }
}
