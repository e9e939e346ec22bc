//! Group and user records as seen by the aggregation engine.

use serde::{Deserialize, Serialize};

use super::settings::AggregationSettings;
use crate::id::Id;

/// Typed ID for groups.
pub type GroupId = Id<Group>;

/// Typed ID for users.
pub type UserId = Id<User>;

/// Source marker meaning "every user in the system".
pub const EVERYONE_GROUP_ID: GroupId = GroupId::nil();

/// A group and its aggregation configuration.
///
/// `aggregation` is `None` for plain groups that were never configured.
/// Plain groups keep their administratively assigned members; the engine
/// only reads them (as sources or exclusions) and propagates from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub aggregation: Option<AggregationSettings>,
}

impl Group {
    /// Create a plain, unconfigured group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GroupId::new(),
            name: name.into(),
            aggregation: None,
        }
    }

    /// Attach aggregation settings.
    pub fn with_settings(mut self, settings: AggregationSettings) -> Self {
        self.aggregation = Some(settings);
        self
    }

    /// True when the group has at least one source group.
    pub fn is_aggregating_group(&self) -> bool {
        self.aggregation
            .as_ref()
            .is_some_and(AggregationSettings::is_aggregating)
    }

    pub fn settings(&self) -> Option<&AggregationSettings> {
        self.aggregation.as_ref()
    }
}

/// A user. Only the email matters here (domain exclusion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
        }
    }

    pub fn email_domain(&self) -> Option<&str> {
        email_domain(&self.email)
    }
}

/// Substring after the last `@`, or `None` when there is no domain part.
pub fn email_domain(email: &str) -> Option<&str> {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_domain_uses_last_at_sign() {
        assert_eq!(email_domain("a@bad.com"), Some("bad.com"));
        assert_eq!(email_domain("\"odd@local\"@example.org"), Some("example.org"));
        assert_eq!(email_domain("no-at-sign"), None);
        assert_eq!(email_domain("trailing@"), None);
    }

    #[test]
    fn domain_is_case_sensitive() {
        let user = User::new("someone@Bad.com");
        assert_eq!(user.email_domain(), Some("Bad.com"));
        assert_ne!(user.email_domain(), Some("bad.com"));
    }

    #[test]
    fn plain_group_is_not_aggregating() {
        let group = Group::new("staff");
        assert!(!group.is_aggregating_group());

        let configured = Group::new("all-staff").with_settings(AggregationSettings::default());
        assert!(!configured.is_aggregating_group());

        let aggregating = Group::new("everyone-but")
            .with_settings(AggregationSettings::default().with_sources([EVERYONE_GROUP_ID]));
        assert!(aggregating.is_aggregating_group());
    }
}
