use serde::Serialize;
use std::ops::AddAssign;
use std::time::Duration;

use crate::executor::QueryOutcome;

/// Graph mutation counters reported with a query result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MutationCounts {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub labels_added: u64,
    pub properties_set: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
}

impl AddAssign for MutationCounts {
    fn add_assign(&mut self, other: Self) {
        self.nodes_created += other.nodes_created;
        self.nodes_deleted += other.nodes_deleted;
        self.labels_added += other.labels_added;
        self.properties_set += other.properties_set;
        self.relationships_created += other.relationships_created;
        self.relationships_deleted += other.relationships_deleted;
    }
}

/// Outcome of one request, sent from a worker to the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    /// Index of the query template that was sent
    pub query_index: usize,
    pub client_micros: u64,
    /// Zero when the request failed
    pub internal_micros: u64,
    pub error: bool,
    pub empty: bool,
    pub mutations: MutationCounts,
}

impl ResultRecord {
    pub fn success(query_index: usize, elapsed: Duration, outcome: &QueryOutcome) -> Self {
        Self {
            query_index,
            client_micros: duration_micros(elapsed),
            internal_micros: outcome.internal_micros,
            error: false,
            empty: outcome.empty,
            mutations: outcome.mutations,
        }
    }

    pub fn failure(query_index: usize, elapsed: Duration) -> Self {
        Self {
            query_index,
            client_micros: duration_micros(elapsed),
            internal_micros: 0,
            error: true,
            empty: true,
            mutations: MutationCounts::default(),
        }
    }
}

fn duration_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
