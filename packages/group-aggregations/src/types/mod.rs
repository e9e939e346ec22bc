//! Domain types for aggregation: groups, users, settings, jobs and deltas.

pub mod delta;
pub mod group;
pub mod job;
pub mod settings;

pub use delta::{GroupFailure, JobOutcome, MembershipDelta, ReconcileReport};
pub use group::{email_domain, Group, GroupId, User, UserId, EVERYONE_GROUP_ID};
pub use job::{AggregationJob, EntryPoint, JobAction, MembershipChange};
pub use settings::{format_id_list, parse_domain_list, parse_id_list, AggregationSettings};
