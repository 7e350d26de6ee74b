//! Input checks applied before anything touches the database.

use chrono::NaiveDate;

use crate::error::{ClinicalError, FieldError};

pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_CHIEF_COMPLAINT_LENGTH: usize = 500;
pub const MAX_ASSESSMENT_LENGTH: usize = 2000;
pub const MAX_NOTE_LENGTH: usize = 5000;
pub const MAX_PRESCRIPTIONS_PER_ENCOUNTER: usize = 10;
pub const MAX_REFILLS: i32 = 12;

/// Collects field errors and reports them together.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Present, not blank, and at most `max` characters.
    pub fn required_text(&mut self, field: &str, value: Option<&str>, max: usize) {
        match value.map(str::trim) {
            None | Some("") => self.reject(field, "is required"),
            Some(text) => self.max_length(field, text, max),
        }
    }

    pub fn optional_text(&mut self, field: &str, value: Option<&str>, max: usize) {
        if let Some(text) = value {
            self.max_length(field, text, max);
        }
    }

    fn max_length(&mut self, field: &str, text: &str, max: usize) {
        if text.chars().count() > max {
            self.reject(field, format!("must be at most {} characters", max));
        }
    }

    /// `later` must not precede `earlier` when both are present.
    pub fn date_order(
        &mut self,
        field: &str,
        earlier: Option<NaiveDate>,
        later: Option<NaiveDate>,
    ) {
        if let (Some(earlier), Some(later)) = (earlier, later) {
            if later < earlier {
                self.reject(field, format!("must not be before {}", earlier));
            }
        }
    }

    pub fn in_range(&mut self, field: &str, value: Option<i32>, min: i32, max: i32) {
        if let Some(value) = value {
            if value < min || value > max {
                self.reject(field, format!("must be between {} and {}", min, max));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), ClinicalError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ClinicalError::ValidationFailed(self.errors))
        }
    }
}

/// Loose structural check; delivery is not our concern.
pub fn looks_like_email(value: &str) -> bool {
    let mut parts = value.splitn(2, '@');
    match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        _ => false,
    }
}
