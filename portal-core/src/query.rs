//! Paged listing queries
//!
//! A [`PageQuery`] can only be built from validated parts, so the store
//! adapters never see an unsupported sort column or a zero page size. The
//! canonical [`PageKey`] derived from it is what the page cache is keyed on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::QueryError;
use crate::record::Record;

/// Default page size for listing queries.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Maximum page size for listing queries.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Sortable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Id,
    Name,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
        }
    }
}

impl FromStr for SortField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "name" => Ok(Self::Name),
            other => Err(QueryError::UnsupportedSort {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(QueryError::UnsupportedOrder {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical cache key for one listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub sort: SortField,
    pub order: SortOrder,
    pub page: u32,
    pub page_size: u32,
}

/// A validated listing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    sort: SortField,
    order: SortOrder,
    page: u32,
    page_size: u32,
}

impl PageQuery {
    /// Build a query from typed parts, validating the paging bounds.
    pub fn new(
        sort: SortField,
        order: SortOrder,
        page: u32,
        page_size: u32,
    ) -> Result<Self, QueryError> {
        if page == 0 {
            return Err(QueryError::InvalidPage { page });
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(QueryError::InvalidPageSize {
                page_size,
                max: MAX_PAGE_SIZE,
            });
        }
        Ok(Self {
            sort,
            order,
            page,
            page_size,
        })
    }

    /// Build a query from raw request strings.
    pub fn parse(sort: &str, order: &str, page: u32, page_size: u32) -> Result<Self, QueryError> {
        Self::new(sort.parse()?, order.parse()?, page, page_size)
    }

    pub fn sort(&self) -> SortField {
        self.sort
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn key(&self) -> PageKey {
        PageKey {
            sort: self.sort,
            order: self.order,
            page: self.page,
            page_size: self.page_size,
        }
    }

    /// `max(1, ceil(total_count / page_size))`.
    pub fn total_pages(&self, total_count: u64) -> u64 {
        total_count.div_ceil(u64::from(self.page_size)).max(1)
    }

    /// True when the page starts past the last row. Page 1 is never out of range.
    pub fn is_out_of_range(&self, total_count: u64) -> bool {
        self.page > 1 && self.offset() >= total_count
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            sort: SortField::default(),
            order: SortOrder::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of records as returned by a store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSlice {
    pub records: Vec<Record>,
    pub total_count: u64,
    pub out_of_range: bool,
}

impl PageSlice {
    pub fn new(records: Vec<Record>, total_count: u64, query: &PageQuery) -> Self {
        Self {
            records,
            total_count,
            out_of_range: query.is_out_of_range(total_count),
        }
    }
}
