//! API key format validation
//!
//! Keys look like `BK1-<payload>-<app id>-<signature>`. Only the shape is
//! checked locally; the signature is verified by the configuration service.

use std::fmt;

use crate::eval::error::ValidationError;

const PREFIX: &str = "BK1";

/// A syntactically valid API key
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    raw: String,
    app_id: String,
}

impl ApiKey {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let input = input.trim();
        let invalid = |reason: &str| ValidationError::InvalidApiKey(reason.to_string());

        let segments: Vec<&str> = input.split('-').collect();
        if segments.len() != 4 {
            return Err(invalid("expected 4 '-' separated segments"));
        }
        if segments[0] != PREFIX {
            return Err(invalid("unknown key version"));
        }
        for segment in &segments[1..] {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !segment.chars().all(is_base64_char) {
                return Err(invalid("segment contains characters outside the base64 alphabet"));
            }
        }

        Ok(Self {
            raw: input.to_string(),
            app_id: segments[2].to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='
}

// Keys are secrets; never print them in full
impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({}-…-{})", PREFIX, self.app_id)
    }
}
