//! Per-group aggregation settings.
//!
//! Settings are stored as a typed record. The administrative surface still
//! speaks pipe-delimited text (`"id|id|id"`), so this module parses that
//! text once, when settings are written, and formats it back for display.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::group::{GroupId, User, EVERYONE_GROUP_ID};
use crate::error::{AggregationError, Result};

const LIST_DELIMITER: char = '|';

/// How a group's membership is derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Groups whose members are unioned into this group.
    #[serde(default)]
    pub source_groups: BTreeSet<GroupId>,

    /// Members of any of these groups are excluded.
    #[serde(default)]
    pub excluded_groups: BTreeSet<GroupId>,

    /// Users whose email domain is listed here are excluded.
    ///
    /// Matching is exact and case-sensitive against the text after the
    /// last `@`. No wildcard or subdomain matching.
    #[serde(default)]
    pub excluded_domains: BTreeSet<String>,

    /// Re-apply group exclusions to existing members whenever a source
    /// of this group reconciles, not only when members are added.
    #[serde(default)]
    pub retroactive_exclusion: bool,
}

impl AggregationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the text form used by the admin surface.
    pub fn from_fields(
        source_groups: &str,
        excluded_groups: &str,
        excluded_domains: &str,
        retroactive_exclusion: bool,
    ) -> Result<Self> {
        Ok(Self {
            source_groups: parse_id_list(source_groups)?,
            excluded_groups: parse_id_list(excluded_groups)?,
            excluded_domains: parse_domain_list(excluded_domains)?,
            retroactive_exclusion,
        })
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = GroupId>) -> Self {
        self.source_groups = sources.into_iter().collect();
        self
    }

    pub fn with_excluded_groups(mut self, groups: impl IntoIterator<Item = GroupId>) -> Self {
        self.excluded_groups = groups.into_iter().collect();
        self
    }

    pub fn with_excluded_domains(
        mut self,
        domains: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.excluded_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retroactive_exclusion(mut self, retroactive: bool) -> Self {
        self.retroactive_exclusion = retroactive;
        self
    }

    /// True when at least one source group is configured.
    pub fn is_aggregating(&self) -> bool {
        !self.source_groups.is_empty()
    }

    /// True when the everyone sentinel is one of the sources.
    pub fn includes_everyone(&self) -> bool {
        self.source_groups.contains(&EVERYONE_GROUP_ID)
    }

    pub fn excludes_domain(&self, domain: &str) -> bool {
        self.excluded_domains.contains(domain)
    }

    /// True when the user's email domain is excluded.
    pub fn excludes_email_of(&self, user: &User) -> bool {
        !self.excluded_domains.is_empty()
            && user
                .email_domain()
                .is_some_and(|domain| self.excludes_domain(domain))
    }

    /// Check the record before it is written for `group_id`.
    ///
    /// Graph-wide checks (cycles) live in [`crate::GroupGraph::validate_update`].
    pub fn validate(&self, group_id: GroupId) -> Result<()> {
        if self.source_groups.contains(&group_id) || self.excluded_groups.contains(&group_id) {
            return Err(AggregationError::SelfReference(group_id));
        }
        for domain in &self.excluded_domains {
            validate_domain(domain)?;
        }
        Ok(())
    }

    /// Text form of the source list.
    pub fn source_groups_field(&self) -> String {
        format_id_list(&self.source_groups)
    }

    /// Text form of the excluded group list.
    pub fn excluded_groups_field(&self) -> String {
        format_id_list(&self.excluded_groups)
    }

    /// Text form of the excluded domain list.
    pub fn excluded_domains_field(&self) -> String {
        self.excluded_domains
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Parse a pipe-delimited list of group ids. Blank entries are ignored.
pub fn parse_id_list(raw: &str) -> Result<BTreeSet<GroupId>> {
    raw.split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            GroupId::parse(entry).map_err(|e| AggregationError::InvalidIdList {
                entry: entry.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Parse a pipe-delimited list of email domains. Blank entries are ignored.
pub fn parse_domain_list(raw: &str) -> Result<BTreeSet<String>> {
    raw.split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| validate_domain(entry).map(|_| entry.to_string()))
        .collect()
}

pub fn format_id_list(ids: &BTreeSet<GroupId>) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

fn validate_domain(domain: &str) -> Result<()> {
    let bare = !domain.is_empty()
        && !domain.contains(LIST_DELIMITER)
        && !domain.contains('@')
        && !domain.chars().any(char::is_whitespace);
    if bare {
        Ok(())
    } else {
        Err(AggregationError::InvalidDomain(domain.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipe_delimited_ids() {
        let a = GroupId::new();
        let b = GroupId::new();
        let parsed = parse_id_list(&format!("{}| {} ||", a, b)).unwrap();
        assert_eq!(parsed, BTreeSet::from([a, b]));
    }

    #[test]
    fn empty_field_means_no_ids() {
        assert!(parse_id_list("").unwrap().is_empty());
        assert!(parse_id_list(" | ").unwrap().is_empty());
    }

    #[test]
    fn malformed_id_is_rejected() {
        let err = parse_id_list("not-a-uuid").unwrap_err();
        assert!(matches!(err, AggregationError::InvalidIdList { ref entry, .. } if entry == "not-a-uuid"));
        assert!(err.is_configuration());
    }

    #[test]
    fn domains_keep_case() {
        let domains = parse_domain_list("Bad.com|excluded.org").unwrap();
        assert!(domains.contains("Bad.com"));
        assert!(!domains.contains("bad.com"));
    }

    #[test]
    fn domain_with_at_sign_is_rejected() {
        assert!(matches!(
            parse_domain_list("user@bad.com"),
            Err(AggregationError::InvalidDomain(_))
        ));
        assert!(matches!(
            parse_domain_list("bad .com"),
            Err(AggregationError::InvalidDomain(_))
        ));
    }

    #[test]
    fn fields_round_trip_through_text() {
        let child = GroupId::new();
        let excluded = GroupId::new();
        let settings = AggregationSettings::from_fields(
            &child.to_string(),
            &excluded.to_string(),
            "excluded.com",
            true,
        )
        .unwrap();

        assert_eq!(settings.source_groups_field(), child.to_string());
        assert_eq!(settings.excluded_groups_field(), excluded.to_string());
        assert_eq!(settings.excluded_domains_field(), "excluded.com");
        assert!(settings.retroactive_exclusion);
    }

    #[test]
    fn self_reference_is_rejected() {
        let group = GroupId::new();
        let settings = AggregationSettings::new().with_excluded_groups([group]);
        assert!(matches!(
            settings.validate(group),
            Err(AggregationError::SelfReference(id)) if id == group
        ));
    }

    #[test]
    fn excludes_email_only_on_exact_domain() {
        let settings = AggregationSettings::new().with_excluded_domains(["bad.com"]);
        assert!(settings.excludes_email_of(&User::new("a@bad.com")));
        assert!(!settings.excludes_email_of(&User::new("a@sub.bad.com")));
        assert!(!settings.excludes_email_of(&User::new("a@BAD.com")));
        assert!(!settings.excludes_email_of(&User::new("nobody")));
    }
}
