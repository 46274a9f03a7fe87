//! Pagination for list queries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("page number must be at least 1")]
    PageNumber,
    #[error("page size must be at least 1")]
    PageSize,
}

/// Raw list request as it arrives on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    #[serde(default = "first_page")]
    pub page_num: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default)]
    pub name: String,
}

fn first_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            page_num: first_page(),
            page_size: default_page_size(),
            name: String::new(),
        }
    }
}

impl ListRequest {
    pub fn new(page_num: u64, page_size: u64, name: impl Into<String>) -> Self {
        Self {
            page_num,
            page_size,
            name: name.into(),
        }
    }

    /// Validate and clamp into a query the store can run.
    pub fn to_query(&self) -> Result<PageQuery, PageError> {
        if self.page_num == 0 {
            return Err(PageError::PageNumber);
        }
        if self.page_size == 0 {
            return Err(PageError::PageSize);
        }
        Ok(PageQuery {
            page: self.page_num,
            size: self.page_size.min(MAX_PAGE_SIZE),
            name: self.name.clone(),
        })
    }
}

/// Validated pagination with a case-sensitive name-substring filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub page: u64,
    pub size: u64,
    pub name: String,
}

impl PageQuery {
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.size)
    }

    /// Every row on one page, used by internal callers that need a full scan.
    pub fn all() -> Self {
        Self {
            page: 1,
            size: u64::MAX / 2,
            name: String::new(),
        }
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: u64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total: self.total,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let req: ListRequest = serde_json::from_str("{}").unwrap();
        let query = req.to_query().unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.size, DEFAULT_PAGE_SIZE);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn test_page_size_clamped() {
        let query = ListRequest::new(1, 101, "").to_query().unwrap();
        assert_eq!(query.size, 100);
    }

    #[test]
    fn test_zero_rejected() {
        assert_eq!(
            ListRequest::new(1, 0, "").to_query(),
            Err(PageError::PageSize)
        );
        assert_eq!(
            ListRequest::new(0, 20, "").to_query(),
            Err(PageError::PageNumber)
        );
    }

    #[test]
    fn test_wire_boundaries() {
        let cases = [
            (r#"{"pageNum":1,"pageSize":1}"#, Ok(1)),
            (r#"{"pageNum":1,"pageSize":100}"#, Ok(100)),
            (r#"{"pageNum":1,"pageSize":101}"#, Ok(100)),
            (r#"{"pageNum":2,"pageSize":18446744073709551615}"#, Ok(100)),
            (r#"{"pageNum":1,"pageSize":0}"#, Err(PageError::PageSize)),
            (r#"{"pageNum":0,"pageSize":20}"#, Err(PageError::PageNumber)),
            (r#"{"pageNum":0,"pageSize":0}"#, Err(PageError::PageNumber)),
        ];
        for (body, want) in cases {
            let req: ListRequest = serde_json::from_str(body).unwrap();
            let got = req.to_query().map(|q| q.size);
            assert_eq!(got, want, "{body}");
        }
    }

    #[test]
    fn test_offset() {
        let query = ListRequest::new(3, 20, "edge").to_query().unwrap();
        assert_eq!(query.offset(), 40);
        assert_eq!(query.name, "edge");
    }
}
