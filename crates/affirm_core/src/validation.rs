use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Field, FieldError, ValidationErrors};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Submission {
    pub title: String,
    pub body: String,
    pub trigger_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(title: impl Into<String>, body: impl Into<String>, trigger_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            trigger_at,
        }
    }
}

/// Minimum lengths are counted in characters after trimming whitespace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationRules {
    pub min_title_len: usize,
    pub min_body_len: usize,
}

impl ValidationRules {
    pub const DEFAULT_MIN_TITLE_LEN: usize = 3;
    pub const DEFAULT_MIN_BODY_LEN: usize = 5;
    pub const LEGACY_MIN_BODY_LEN: usize = 8;

    pub fn legacy() -> Self {
        Self {
            min_body_len: Self::LEGACY_MIN_BODY_LEN,
            ..Self::default()
        }
    }

    pub fn validate(&self, submission: &Submission, now: DateTime<Utc>) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        if char_len(&submission.title) < self.min_title_len {
            errors.push(FieldError {
                field: Field::Title,
                message: format!("Title needs to be at least {} characters", self.min_title_len),
            });
        }
        if char_len(&submission.body) < self.min_body_len {
            errors.push(FieldError {
                field: Field::Body,
                message: format!("Message needs to be at least {} characters", self.min_body_len),
            });
        }
        if submission.trigger_at <= now {
            errors.push(FieldError {
                field: Field::TriggerAt,
                message: "Pick a time in the future".to_string(),
            });
        }
        match ValidationErrors::from_errors(errors) {
            Some(errors) => Err(errors),
            None => Ok(()),
        }
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_title_len: Self::DEFAULT_MIN_TITLE_LEN,
            min_body_len: Self::DEFAULT_MIN_BODY_LEN,
        }
    }
}

fn char_len(value: &str) -> usize {
    value.trim().chars().count()
}
