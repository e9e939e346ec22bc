//! Reconcile-Group behavior against the in-memory stack.

use std::collections::BTreeSet;
use std::time::Duration;

use group_aggregations::testing::Harness;
use group_aggregations::{
    AggregationConfig, AggregationJob, AggregationSettings, JobOutcome, MembershipWriter,
    EVERYONE_GROUP_ID,
};

fn sources(ids: impl IntoIterator<Item = group_aggregations::GroupId>) -> AggregationSettings {
    AggregationSettings::new().with_sources(ids)
}

#[tokio::test]
async fn basic_aggregation_adds_source_members() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let user = h.user("u@example.com").await;
    h.store.admin_add_member(child, user).await;

    h.configure(parent, sources([child])).await.unwrap();
    h.drain().await.unwrap();

    assert!(h.members(parent).await.contains(&user));
}

#[tokio::test]
async fn second_reconcile_writes_nothing() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    for i in 0..5 {
        let user = h.user(&format!("u{i}@example.com")).await;
        h.store.admin_add_member(child, user).await;
    }
    h.configure(parent, sources([child])).await.unwrap();

    let first = h.run(AggregationJob::update(parent)).await;
    assert_eq!(first.writes(), 5);
    let writes = h.store.write_count();

    let second = h.run(AggregationJob::update(parent)).await;
    assert!(second.is_completed());
    assert_eq!(second.writes(), 0);
    assert_eq!(h.store.write_count(), writes);
}

#[tokio::test]
async fn excluded_group_members_are_left_out() {
    let h = Harness::new();
    let child = h.group("child").await;
    let excluded = h.group("excluded").await;
    let parent = h.group("parent").await;
    let kept = h.user("kept@example.com").await;
    let blocked = h.user("blocked@example.com").await;
    h.store.admin_add_member(child, kept).await;
    h.store.admin_add_member(child, blocked).await;
    h.store.admin_add_member(excluded, blocked).await;

    h.configure(parent, sources([child]).with_excluded_groups([excluded]))
        .await
        .unwrap();
    h.drain().await.unwrap();

    assert_eq!(h.members(parent).await, BTreeSet::from([kept]));
}

#[tokio::test]
async fn excluded_domains_are_left_out() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let good = h.user("a@good.org").await;
    let bad = h.user("a@bad.com").await;
    let lookalike = h.user("a@notbad.com").await;
    for user in [good, bad, lookalike] {
        h.store.admin_add_member(child, user).await;
    }

    h.configure(parent, sources([child]).with_excluded_domains(["bad.com"]))
        .await
        .unwrap();
    h.drain().await.unwrap();

    assert_eq!(h.members(parent).await, BTreeSet::from([good, lookalike]));
}

#[tokio::test]
async fn removing_all_sources_clears_the_group() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let user = h.user("u@example.com").await;
    h.store.admin_add_member(child, user).await;
    h.configure(parent, sources([child])).await.unwrap();
    h.drain().await.unwrap();
    assert_eq!(h.members(parent).await, BTreeSet::from([user]));

    h.configure(parent, AggregationSettings::new()).await.unwrap();
    h.drain().await.unwrap();

    assert!(h.members(parent).await.is_empty());
}

#[tokio::test]
async fn plain_groups_are_never_rewritten() {
    let h = Harness::new();
    let plain = h.group("plain").await;
    let user = h.user("u@example.com").await;
    h.store.admin_add_member(plain, user).await;

    let outcome = h.run(AggregationJob::update(plain)).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.writes(), 0);
    assert_eq!(h.members(plain).await, BTreeSet::from([user]));
}

#[tokio::test]
async fn everyone_sentinel_tracks_all_users_and_exclusions() {
    let h = Harness::new();
    let everyone = h.group("everyone").await;
    let excluded = h.group("excluded").await;
    let u1 = h.user("u1@example.com").await;
    let u2 = h.user("u2@example.com").await;
    let u3 = h.user("u3@example.com").await;

    h.configure(everyone, sources([EVERYONE_GROUP_ID])).await.unwrap();
    h.drain().await.unwrap();
    assert_eq!(h.members(everyone).await, BTreeSet::from([u1, u2, u3]));

    h.store.admin_add_member(excluded, u2).await;
    h.configure(
        everyone,
        sources([EVERYONE_GROUP_ID]).with_excluded_groups([excluded]),
    )
    .await
    .unwrap();
    h.drain().await.unwrap();

    assert_eq!(h.members(everyone).await, BTreeSet::from([u1, u3]));
}

#[tokio::test]
async fn everyone_sentinel_honors_domains() {
    let h = Harness::new();
    let everyone = h.group("everyone").await;
    let staff = h.user("a@corp.example").await;
    let _contractor = h.user("b@vendor.example").await;

    h.configure(
        everyone,
        sources([EVERYONE_GROUP_ID]).with_excluded_domains(["vendor.example"]),
    )
    .await
    .unwrap();
    h.drain().await.unwrap();

    assert_eq!(h.members(everyone).await, BTreeSet::from([staff]));
}

#[tokio::test]
async fn disabled_engine_writes_nothing() {
    let h = Harness::with_config(AggregationConfig::disabled());
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let user = h.user("u@example.com").await;
    h.store.admin_add_member(child, user).await;
    h.configure(parent, sources([child])).await.unwrap();

    let outcome = h.run(AggregationJob::update(parent)).await;
    let drained = h.drain().await.unwrap();

    assert_eq!(outcome, JobOutcome::Disabled);
    assert_eq!(drained.disabled, 1);
    assert_eq!(h.store.write_count(), 0);
    assert!(h.members(parent).await.is_empty());
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn missing_group_is_skipped() {
    let h = Harness::new();
    let outcome = h
        .run(AggregationJob::update(group_aggregations::GroupId::new()))
        .await;
    assert!(matches!(outcome, JobOutcome::Skipped { .. }));
}

#[tokio::test]
async fn missing_source_ids_are_ignored() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let user = h.user("u@example.com").await;
    h.store.admin_add_member(child, user).await;

    h.configure(parent, sources([child, group_aggregations::GroupId::new()]))
        .await
        .unwrap();
    h.drain().await.unwrap();

    assert_eq!(h.members(parent).await, BTreeSet::from([user]));
}

#[tokio::test]
async fn store_failure_aborts_only_that_group() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let user = h.user("u@example.com").await;
    h.store.admin_add_member(child, user).await;
    h.configure(parent, sources([child])).await.unwrap();
    h.queue.clear().await;
    h.store.fail_writes_for(parent).await;

    let outcome = h.run(AggregationJob::update(parent)).await;
    assert!(matches!(outcome, JobOutcome::Failed { .. }));
    assert!(h.members(parent).await.is_empty());

    // Redelivery after the cause is fixed converges.
    h.store.clear_failures().await;
    let retried = h.run(AggregationJob::update(parent)).await;
    assert_eq!(retried.writes(), 1);
    assert_eq!(h.members(parent).await, BTreeSet::from([user]));
}

#[tokio::test]
async fn sibling_parent_failure_does_not_block_the_other() {
    let h = Harness::new();
    let child = h.group("child").await;
    let healthy = h.group("healthy").await;
    let broken = h.group("broken").await;
    h.configure(healthy, sources([child])).await.unwrap();
    h.configure(broken, sources([child])).await.unwrap();
    h.drain().await.unwrap();

    let user = h.user("u@example.com").await;
    h.store.fail_writes_for(broken).await;
    h.add_member(child, user).await.unwrap();
    let drained = h.drain().await.unwrap();

    assert_eq!(drained.failed, 0);
    assert!(h.members(healthy).await.contains(&user));
    assert!(!h.members(broken).await.contains(&user));

    let job = AggregationJob::user_added(child, user);
    let outcome = h.run(job).await;
    let report = outcome.report().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].group_id, broken);
}

#[tokio::test]
async fn plan_group_does_not_write() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let user = h.user("u@example.com").await;
    h.store.admin_add_member(child, user).await;
    h.store.save_settings(parent, Some(sources([child]))).await.unwrap();

    let delta = h.aggregator.plan_group(parent).await.unwrap().unwrap();

    assert_eq!(delta.additions, BTreeSet::from([user]));
    assert!(delta.removals.is_empty());
    assert_eq!(h.store.write_count(), 0);
    assert!(h.aggregator.plan_group(child).await.unwrap().is_none());
}

#[tokio::test]
async fn reconcile_plans_only_once_it_holds_the_group() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let user = h.user("u@example.com").await;
    h.store.admin_add_member(child, user).await;
    h.store.save_settings(parent, Some(sources([child]))).await.unwrap();

    let held = h.store.lock_group(parent).await.unwrap();
    let job = {
        let aggregator = h.aggregator.clone();
        tokio::spawn(async move { aggregator.handle(&AggregationJob::update(parent)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!job.is_finished());

    // The source changes while the job waits; it must plan from the new state.
    h.store.admin_remove_member(child, user).await;
    held.release().await.unwrap();

    assert!(job.await.unwrap().is_completed());
    assert!(h.members(parent).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_jobs_for_one_group_converge() {
    let h = Harness::new();
    let child = h.group("child").await;
    let parent = h.group("parent").await;
    let mut users = Vec::new();
    for i in 0..20 {
        let user = h.user(&format!("u{i}@example.com")).await;
        h.store.admin_add_member(child, user).await;
        users.push(user);
    }
    h.store.save_settings(parent, Some(sources([child]))).await.unwrap();
    assert!(h.run(AggregationJob::update(parent)).await.is_completed());

    let (leaving, staying) = users.split_at(10);
    for user in leaving {
        h.store.admin_remove_member(child, *user).await;
    }

    let mut jobs = Vec::new();
    for user in leaving {
        jobs.push(AggregationJob::user_removed(child, *user));
        jobs.push(AggregationJob::update(parent));
    }
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let aggregator = h.aggregator.clone();
            tokio::spawn(async move { aggregator.handle(&job).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_completed());
    }

    let expected: BTreeSet<_> = staying.iter().copied().collect();
    assert_eq!(h.members(parent).await, expected);
    assert_eq!(h.store.write_count(), 30);
}
