//! Pagination windows and page metadata
//!
//! Offset mode passes the window through. Page mode clamps an
//! out-of-range page to the last page and derives the window from the
//! clamped page; an empty result is always page 1 of 0.

use serde::{Deserialize, Serialize};

use crate::core::config::PaginationConfig;
use crate::error::FilterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PaginationRequest {
    Offset {
        offset: u64,
        limit: u64,
    },
    Page {
        page: u64,
        #[serde(rename = "perPage")]
        per_page: u64,
    },
}

impl PaginationRequest {
    /// First page at the configured default size
    pub fn default_page(config: &PaginationConfig) -> Self {
        Self::Page {
            page: 1,
            per_page: config.default_per_page,
        }
    }

    /// Reject zero or oversized pages before any query runs
    pub fn check(&self, config: &PaginationConfig) -> Result<(), FilterError> {
        let size = match *self {
            Self::Offset { limit, .. } => limit,
            Self::Page { page, per_page } => {
                if page == 0 {
                    return Err(FilterError::InvalidPagination(
                        "page numbers start at 1".to_string(),
                    ));
                }
                per_page
            }
        };
        if size == 0 {
            return Err(FilterError::InvalidPagination(
                "page size must be at least 1".to_string(),
            ));
        }
        if size > config.max_per_page {
            return Err(FilterError::InvalidPagination(format!(
                "page size {} exceeds the maximum of {}",
                size, config.max_per_page
            )));
        }
        Ok(())
    }

    /// Window as requested, before any clamping against a total
    pub fn requested_window(&self) -> Window {
        match *self {
            Self::Offset { offset, limit } => Window { offset, limit },
            Self::Page { page, per_page } => Window {
                offset: page.saturating_sub(1).saturating_mul(per_page),
                limit: per_page,
            },
        }
    }

    /// Page mode needs the total row count, offset mode does not
    pub fn needs_total(&self) -> bool {
        matches!(self, Self::Page { .. })
    }
}

/// Rows `[offset, offset + limit)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

impl Window {
    /// Slice bounds into a materialised list of `len` rows
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let start = usize::try_from(self.offset).unwrap_or(usize::MAX).min(len);
        let end = start
            .saturating_add(usize::try_from(self.limit).unwrap_or(usize::MAX))
            .min(len);
        (start, end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub current_page: u64,
    pub per_page: u64,
    pub page_count: u64,
    pub total_count: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// Window and, in page mode, page metadata for `total_count` rows
pub fn assemble(request: &PaginationRequest, total_count: u64) -> (Window, Option<PageInfo>) {
    match *request {
        PaginationRequest::Offset { offset, limit } => (Window { offset, limit }, None),
        PaginationRequest::Page { page, per_page } => {
            let per_page = per_page.max(1);
            let page_count = total_count.div_ceil(per_page);
            let current_page = if page_count == 0 {
                1
            } else {
                page.clamp(1, page_count)
            };
            if current_page != page {
                tracing::debug!(requested = page, clamped = current_page, page_count, "Page clamped");
            }
            let window = Window {
                offset: (current_page - 1).saturating_mul(per_page),
                limit: per_page,
            };
            let info = PageInfo {
                current_page,
                per_page,
                page_count,
                total_count,
                has_next_page: current_page < page_count,
                has_previous_page: page_count > 0 && current_page > 1,
            };
            (window, Some(info))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page: u64, per_page: u64) -> PaginationRequest {
        PaginationRequest::Page { page, per_page }
    }

    #[test]
    fn test_empty_result_is_page_one_of_zero() {
        for per_page in [1, 10, 500] {
            let (window, info) = assemble(&page(1, per_page), 0);
            let info = info.unwrap();
            assert_eq!(info.current_page, 1);
            assert_eq!(info.page_count, 0);
            assert!(!info.has_next_page);
            assert!(!info.has_previous_page);
            assert_eq!(window.offset, 0);
        }
    }

    #[test]
    fn test_page_past_end_clamps_to_last() {
        let (window, info) = assemble(&page(100, 10), 47);
        let info = info.unwrap();
        assert_eq!(info.current_page, 5);
        assert_eq!(info.page_count, 5);
        assert!(!info.has_next_page);
        assert!(info.has_previous_page);
        // rows 41..=47
        assert_eq!(window, Window { offset: 40, limit: 10 });
        assert_eq!(window.bounds(47), (40, 47));
    }

    #[test]
    fn test_requested_window_is_unclamped() {
        assert_eq!(
            page(100, 10).requested_window(),
            Window {
                offset: 990,
                limit: 10
            }
        );
        let offset = PaginationRequest::Offset {
            offset: 5,
            limit: 3,
        };
        assert_eq!(offset.requested_window(), Window { offset: 5, limit: 3 });
    }

    #[test]
    fn test_middle_page() {
        let (window, info) = assemble(&page(2, 10), 47);
        let info = info.unwrap();
        assert!(info.has_next_page && info.has_previous_page);
        assert_eq!(window.offset, 10);
    }

    #[test]
    fn test_offset_mode_passes_through() {
        let request = PaginationRequest::Offset {
            offset: 90,
            limit: 20,
        };
        let (window, info) = assemble(&request, 47);
        assert_eq!(window, Window { offset: 90, limit: 20 });
        assert!(info.is_none());
        assert_eq!(window.bounds(47), (47, 47));
    }

    #[test]
    fn test_check_limits() {
        let config = PaginationConfig::default();
        assert!(page(1, 25).check(&config).is_ok());
        assert_eq!(
            page(0, 25).check(&config).unwrap_err().code(),
            "INVALID_PAGINATION"
        );
        assert!(page(1, 0).check(&config).is_err());
        assert!(page(1, config.max_per_page + 1).check(&config).is_err());
        assert!(
            PaginationRequest::Offset { offset: 0, limit: 0 }
                .check(&config)
                .is_err()
        );
    }

    #[test]
    fn test_request_serde() {
        let by_page: PaginationRequest =
            serde_json::from_str(r#"{"page": 2, "perPage": 10}"#).unwrap();
        assert_eq!(by_page, page(2, 10));
        let by_offset: PaginationRequest =
            serde_json::from_str(r#"{"offset": 5, "limit": 10}"#).unwrap();
        assert_eq!(by_offset, PaginationRequest::Offset { offset: 5, limit: 10 });
    }
}
