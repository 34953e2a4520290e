//! Offset pagination arithmetic for the search index.
//!
//! The engine refuses to page past its result window, so every offset query
//! is checked against [`RESULT_WINDOW`] before it is built.

/// Deepest result offset-based paging may reach
pub const RESULT_WINDOW: i64 = 10_000;

/// Largest page a search request may ask for
pub const MAX_SEARCH_SIZE: i64 = 500;

/// Default page size for search and map queries
pub const DEFAULT_PAGE_SIZE: i64 = 30;

/// Default page size for cursor exports
pub const DEFAULT_EXPORT_SIZE: i64 = 100;

/// Offset of the first hit on `page` (1-based)
pub fn from(page: i64, page_size: i64) -> i64 {
    (page_size * (page - 1)).max(0)
}

/// Search page size, clamped to `1..=500`
pub fn size(page_size: i64) -> i64 {
    page_size.clamp(1, MAX_SEARCH_SIZE)
}

/// Map and export page size, clamped to `1..=10000`
pub fn maximum_size(page_size: i64) -> i64 {
    page_size.clamp(1, RESULT_WINDOW)
}

pub fn total_pages(number_of_results: i64, page_size: i64) -> i64 {
    if number_of_results <= 0 {
        return 0;
    }
    let page_size = page_size.max(1);
    (number_of_results + page_size - 1) / page_size
}

/// `true` when `page * page_size` reaches past the result window
pub fn exceeds_window(page: i64, page_size: i64) -> bool {
    page.saturating_mul(page_size) > RESULT_WINDOW
}

/// Last page a client can actually request
///
/// Returns the clamped page and whether clamping happened, in which case the
/// caller attaches the window warning to the response.
pub fn last_usable_page(total_pages: i64, page_size: i64) -> (i64, bool) {
    let window_pages = RESULT_WINDOW / page_size.max(1);
    if window_pages >= total_pages {
        (total_pages, false)
    } else {
        (window_pages, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_is_zero_based_offset() {
        assert_eq!(from(1, 30), 0);
        assert_eq!(from(3, 30), 60);
        assert_eq!(from(0, 30), 0);
    }

    #[test]
    fn test_sizes_are_clamped() {
        assert_eq!(size(0), 1);
        assert_eq!(size(30), 30);
        assert_eq!(size(5_000), 500);
        assert_eq!(maximum_size(5_000), 5_000);
        assert_eq!(maximum_size(50_000), 10_000);
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 30), 0);
        assert_eq!(total_pages(1, 30), 1);
        assert_eq!(total_pages(30, 30), 1);
        assert_eq!(total_pages(31, 30), 2);
    }

    #[test]
    fn test_window_ceiling() {
        assert!(!exceeds_window(100, 100));
        assert!(exceeds_window(101, 100));
        assert!(exceeds_window(i64::MAX, 2));
    }

    #[test]
    fn test_last_usable_page_clamps_to_window() {
        assert_eq!(last_usable_page(5, 30), (5, false));
        assert_eq!(last_usable_page(1_000, 30), (333, true));
        assert_eq!(last_usable_page(100, 100), (100, false));
    }
}
