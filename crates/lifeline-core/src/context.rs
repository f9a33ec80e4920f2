//! Caller context used for cache attribution and handoff priority.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Account tier of the end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    #[default]
    Standard,
    Premium,
}

/// Handoff priority, 1 (low) to 5 (critical).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const LOW: Priority = Priority(1);
    pub const ELEVATED: Priority = Priority(3);
    pub const HIGH: Priority = Priority(4);
    pub const CRITICAL: Priority = Priority(5);

    /// Clamp any value into 1..=5.
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 5))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::LOW
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("priority must be between 1 and 5, got {value}"))
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed request context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RequestContext {
    /// Caller marked this request as urgent
    pub urgent: bool,

    pub user_tier: UserTier,

    /// Kind of document being processed (e.g. "contract", "invoice")
    pub document_type: Option<String>,

    /// Identity of the model or service that produced the primary answer
    pub model: Option<String>,

    /// Free-form attributes carried into handoff records
    pub attributes: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub fn with_user_tier(mut self, tier: UserTier) -> Self {
        self.user_tier = tier;
        self
    }

    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Source tag used when caching a primary response.
    pub fn source_tag(&self) -> &str {
        self.model.as_deref().unwrap_or("unknown")
    }

    /// Handoff priority derived from the context.
    ///
    /// Contracts raise it to at least 3, premium users to at least 4 and an
    /// urgent flag to 5. Contributions combine with `max`.
    pub fn priority(&self) -> Priority {
        let mut priority = Priority::LOW;

        if self
            .document_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("contract"))
        {
            priority = priority.max(Priority::ELEVATED);
        }

        if self.user_tier == UserTier::Premium {
            priority = priority.max(Priority::HIGH);
        }

        if self.urgent {
            priority = Priority::CRITICAL;
        }

        priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_is_low() {
        assert_eq!(RequestContext::new().priority(), Priority::LOW);
    }

    #[test]
    fn test_priority_contributions() {
        let contract = RequestContext::new().with_document_type("contract");
        assert_eq!(contract.priority().value(), 3);

        let premium = contract.clone().with_user_tier(UserTier::Premium);
        assert_eq!(premium.priority().value(), 4);

        assert_eq!(premium.urgent().priority().value(), 5);
        assert_eq!(RequestContext::new().urgent().priority(), Priority::CRITICAL);
    }

    #[test]
    fn test_priority_bounds() {
        assert_eq!(Priority::new(0).value(), 1);
        assert_eq!(Priority::new(9).value(), 5);
        assert!(Priority::try_from(6).is_err());
        assert_eq!(serde_json::to_string(&Priority::HIGH).unwrap(), "4");
        assert!(serde_json::from_str::<Priority>("7").is_err());
    }

    #[test]
    fn test_source_tag() {
        assert_eq!(RequestContext::new().source_tag(), "unknown");
        assert_eq!(RequestContext::new().with_model("llama3.2:3b").source_tag(), "llama3.2:3b");
    }
}
