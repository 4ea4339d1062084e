use serde::{Deserialize, Serialize};

/// Derived pagination state. Recomputed from page/limit/total whenever it is
/// needed; nothing here is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// An entry in a row of page buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageItem {
    Page(u64),
    Ellipsis,
}

impl PaginationInfo {
    pub fn calculate(page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };

        PaginationInfo {
            current_page: page,
            total_pages,
            total_items: total,
            items_per_page: limit,
            has_next_page: page.saturating_mul(limit) < total,
            has_prev_page: page > 1,
        }
    }

    /// Page buttons to display: first, last, `sibling_count` pages either side
    /// of the current page, with ellipses standing in for skipped runs.
    pub fn page_window(&self, sibling_count: u64) -> Vec<PageItem> {
        let total_pages = self.total_pages;
        // a page past the end is drawn as the last page
        let page = self.current_page.min(total_pages);

        // siblings on both sides + first + last + current + two ellipses
        let total_page_numbers = sibling_count.saturating_mul(2).saturating_add(5);
        if total_page_numbers >= total_pages {
            return range(1, total_pages);
        }

        let left_sibling = page.saturating_sub(sibling_count).max(1);
        let right_sibling = page.saturating_add(sibling_count).min(total_pages);

        let show_left_ellipsis = left_sibling > 2;
        let show_right_ellipsis = right_sibling < total_pages - 1;

        let edge_run = 3 + 2 * sibling_count;

        match (show_left_ellipsis, show_right_ellipsis) {
            (false, true) => {
                let mut items = range(1, edge_run);
                items.push(PageItem::Ellipsis);
                items.push(PageItem::Page(total_pages));
                items
            }
            (true, false) => {
                let mut items = vec![PageItem::Page(1), PageItem::Ellipsis];
                items.extend(range(total_pages - edge_run + 1, total_pages));
                items
            }
            (true, true) => {
                let mut items = vec![PageItem::Page(1), PageItem::Ellipsis];
                items.extend(range(left_sibling, right_sibling));
                items.push(PageItem::Ellipsis);
                items.push(PageItem::Page(total_pages));
                items
            }
            (false, false) => range(1, total_pages),
        }
    }
}

fn range(start: u64, end: u64) -> Vec<PageItem> {
    (start..=end).map(PageItem::Page).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_calculate_basic() {
        let info = PaginationInfo::calculate(2, 10, 25);
        assert_eq!(
            info,
            PaginationInfo {
                current_page: 2,
                total_pages: 3,
                total_items: 25,
                items_per_page: 10,
                has_next_page: true,
                has_prev_page: true,
            }
        );
    }

    #[test]
    fn test_calculate_last_page() {
        let info = PaginationInfo::calculate(3, 10, 30);
        assert!(!info.has_next_page);
        assert_eq!(info.total_pages, 3);
    }

    #[test]
    fn test_calculate_empty() {
        let info = PaginationInfo::calculate(1, 10, 0);
        assert_eq!(info.total_pages, 0);
        assert!(!info.has_next_page);
        assert!(!info.has_prev_page);
    }

    #[test]
    fn test_zero_limit_does_not_divide() {
        let info = PaginationInfo::calculate(1, 0, 10);
        assert_eq!(info.total_pages, 0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(PaginationInfo::calculate(1, 5, 6)).unwrap();
        assert_eq!(value["totalPages"], 2);
        assert_eq!(value["hasNextPage"], true);
    }

    #[test]
    fn test_page_window_small() {
        let info = PaginationInfo::calculate(1, 10, 50);
        assert_eq!(
            info.page_window(1),
            (1..=5).map(PageItem::Page).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_page_window_right_ellipsis() {
        let info = PaginationInfo::calculate(2, 10, 200);
        assert_eq!(
            info.page_window(1),
            vec![
                PageItem::Page(1),
                PageItem::Page(2),
                PageItem::Page(3),
                PageItem::Page(4),
                PageItem::Page(5),
                PageItem::Ellipsis,
                PageItem::Page(20),
            ]
        );
    }

    #[test]
    fn test_page_window_both_ellipses() {
        let info = PaginationInfo::calculate(10, 10, 200);
        assert_eq!(
            info.page_window(1),
            vec![
                PageItem::Page(1),
                PageItem::Ellipsis,
                PageItem::Page(9),
                PageItem::Page(10),
                PageItem::Page(11),
                PageItem::Ellipsis,
                PageItem::Page(20),
            ]
        );
    }

    #[test]
    fn test_page_window_left_ellipsis() {
        let info = PaginationInfo::calculate(19, 10, 200);
        assert_eq!(
            info.page_window(1),
            vec![
                PageItem::Page(1),
                PageItem::Ellipsis,
                PageItem::Page(16),
                PageItem::Page(17),
                PageItem::Page(18),
                PageItem::Page(19),
                PageItem::Page(20),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_pagination_invariants(page in 1u64..10_000, limit in 1u64..1_000, total in 0u64..1_000_000) {
            let info = PaginationInfo::calculate(page, limit, total);
            prop_assert_eq!(info.total_pages, (total + limit - 1) / limit);
            prop_assert_eq!(info.has_next_page, page * limit < total);
            prop_assert_eq!(info.has_prev_page, page > 1);
            prop_assert_eq!(info.total_items, total);
            prop_assert_eq!(info.items_per_page, limit);
        }

        #[test]
        fn prop_page_window_is_bounded(page in 1u64..500, total_pages in 1u64..500, siblings in 0u64..4) {
            let page = page.min(total_pages);
            let info = PaginationInfo::calculate(page, 1, total_pages);
            let window = info.page_window(siblings);
            prop_assert!(window.len() as u64 <= siblings * 2 + 5);
            prop_assert_eq!(window.first(), Some(&PageItem::Page(1)));
            prop_assert_eq!(window.last(), Some(&PageItem::Page(total_pages)));
            prop_assert!(window.contains(&PageItem::Page(page)));
        }

        #[test]
        fn prop_page_window_out_of_range_page(page in any::<u64>(), total_pages in 1u64..500, siblings in prop_oneof![0u64..4, Just(u64::MAX)]) {
            let info = PaginationInfo::calculate(page, 1, total_pages);
            let window = info.page_window(siblings);
            prop_assert_eq!(window.first(), Some(&PageItem::Page(1)));
            prop_assert_eq!(window.last(), Some(&PageItem::Page(total_pages)));
            prop_assert!(window.contains(&PageItem::Page(page.min(total_pages))));
        }
    }

    #[test]
    fn test_page_window_past_the_end() {
        let info = PaginationInfo::calculate(u64::MAX, 10, 100);
        assert!(!info.has_next_page);
        assert_eq!(
            info.page_window(1),
            vec![
                PageItem::Page(1),
                PageItem::Ellipsis,
                PageItem::Page(6),
                PageItem::Page(7),
                PageItem::Page(8),
                PageItem::Page(9),
                PageItem::Page(10),
            ]
        );

        let info = PaginationInfo::calculate(u64::MAX, 10, 200);
        assert_eq!(
            info.page_window(1),
            vec![
                PageItem::Page(1),
                PageItem::Ellipsis,
                PageItem::Page(16),
                PageItem::Page(17),
                PageItem::Page(18),
                PageItem::Page(19),
                PageItem::Page(20),
            ]
        );
    }
}
