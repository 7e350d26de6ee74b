use serde::{Deserialize, Serialize};

use crate::error::{ClinicalError, FieldError};

pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PATIENT_PAGE_SIZE: i64 = 25;
pub const DEFAULT_ENCOUNTER_PAGE_SIZE: i64 = 20;
/// Highest page number accepted; keeps the row offset well inside `i64`.
pub const MAX_PAGE: i64 = 1_000_000;

/// Validated offset pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, page_size: Option<i64>, default_size: i64) -> Result<Self, ClinicalError> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(default_size);

        let mut errors = Vec::new();
        if !(1..=MAX_PAGE).contains(&page) {
            errors.push(FieldError::new("page", format!("must be between 1 and {}", MAX_PAGE)));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            errors.push(FieldError::new(
                "limit",
                format!("must be between 1 and {}", MAX_PAGE_SIZE),
            ));
        }
        if !errors.is_empty() {
            return Err(ClinicalError::ValidationFailed(errors));
        }

        Ok(Self { page, page_size })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// Page metadata returned next to every paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total_count: i64,
    pub total_pages: i64,
}

/// One page of items plus its metadata, serialized as `{data, pagination}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    #[serde(rename = "data")]
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_count: i64) -> Self {
        let total_pages = if total_count == 0 {
            0
        } else {
            (total_count + request.page_size - 1) / request.page_size
        };

        Self {
            items,
            pagination: Pagination {
                page: request.page,
                page_size: request.page_size,
                total_count,
                total_pages,
            },
        }
    }
}
