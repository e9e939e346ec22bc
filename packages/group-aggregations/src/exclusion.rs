//! Exclusion calculator.
//!
//! A user is excluded from an aggregating group when they belong to any of
//! its excluded groups, or when their email domain is one of its excluded
//! domains. Domain matching only looks at the candidates handed in; group
//! exclusion does not depend on candidates at all.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::Result;
use crate::traits::store::MembershipReader;
use crate::types::{AggregationSettings, User, UserId, EVERYONE_GROUP_ID};

/// Users excluded from one group, split by cause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub by_group: BTreeSet<UserId>,
    pub by_domain: BTreeSet<UserId>,
}

impl Exclusions {
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.by_group.contains(user_id) || self.by_domain.contains(user_id)
    }

    /// Union of both causes, deduplicated.
    pub fn all(&self) -> BTreeSet<UserId> {
        self.by_group.union(&self.by_domain).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_group.is_empty() && self.by_domain.is_empty()
    }
}

/// Candidates whose email domain is excluded.
pub fn excluded_by_domain<'a>(
    settings: &AggregationSettings,
    candidates: impl IntoIterator<Item = &'a User>,
) -> BTreeSet<UserId> {
    if settings.excluded_domains.is_empty() {
        return BTreeSet::new();
    }
    candidates
        .into_iter()
        .filter(|user| settings.excludes_email_of(user))
        .map(|user| user.id)
        .collect()
}

/// Members of every excluded group, unioned.
pub async fn excluded_group_users<S>(store: &S, settings: &AggregationSettings) -> Result<BTreeSet<UserId>>
where
    S: MembershipReader + ?Sized,
{
    if settings.excluded_groups.contains(&EVERYONE_GROUP_ID) {
        return store.all_user_ids().await;
    }

    let mut users = BTreeSet::new();
    for group_id in &settings.excluded_groups {
        users.extend(store.group_members(*group_id).await?);
    }
    Ok(users)
}

/// Users to exclude from a group given its settings and candidate users.
pub async fn excluded_users<S>(
    store: &S,
    settings: &AggregationSettings,
    candidates: &[User],
) -> Result<Exclusions>
where
    S: MembershipReader + ?Sized,
{
    let exclusions = Exclusions {
        by_group: excluded_group_users(store, settings).await?,
        by_domain: excluded_by_domain(settings, candidates),
    };

    debug!(
        by_group = exclusions.by_group.len(),
        by_domain = exclusions.by_domain.len(),
        candidates = candidates.len(),
        "computed exclusions"
    );
    Ok(exclusions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::types::{Group, GroupId};

    #[test]
    fn domain_exclusion_only_checks_candidates() {
        let settings = AggregationSettings::new().with_excluded_domains(["bad.com"]);
        let bad = User::new("a@bad.com");
        let good = User::new("b@good.com");

        let excluded = excluded_by_domain(&settings, [&bad, &good]);
        assert_eq!(excluded, BTreeSet::from([bad.id]));
    }

    #[test]
    fn no_domains_means_no_domain_exclusions() {
        let settings = AggregationSettings::new();
        let bad = User::new("a@bad.com");
        assert!(excluded_by_domain(&settings, [&bad]).is_empty());
    }

    #[tokio::test]
    async fn unions_group_and_domain_exclusions() {
        let store = MemoryStore::new();
        let in_excluded = store.insert_user(User::new("x@example.com")).await;
        let bad_domain = store.insert_user(User::new("y@bad.com")).await;
        let both = store.insert_user(User::new("z@bad.com")).await;

        let excluded_group = store.insert_group(Group::new("excluded")).await;
        store.admin_add_member(excluded_group, in_excluded).await;
        store.admin_add_member(excluded_group, both).await;

        let settings = AggregationSettings::new()
            .with_excluded_groups([excluded_group])
            .with_excluded_domains(["bad.com"]);
        let candidates = store.find_users(&[bad_domain, both]).await.unwrap();

        let exclusions = excluded_users(&store, &settings, &candidates).await.unwrap();
        assert_eq!(exclusions.by_group, BTreeSet::from([in_excluded, both]));
        assert_eq!(exclusions.by_domain, BTreeSet::from([bad_domain, both]));
        assert_eq!(exclusions.all(), BTreeSet::from([in_excluded, bad_domain, both]));
    }

    #[tokio::test]
    async fn missing_excluded_group_contributes_nothing() {
        let store = MemoryStore::new();
        let settings = AggregationSettings::new().with_excluded_groups([GroupId::new()]);
        let users = excluded_group_users(&store, &settings).await.unwrap();
        assert!(users.is_empty());
    }
}
