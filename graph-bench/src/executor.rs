use async_trait::async_trait;

use crate::error::Result;
use crate::record::MutationCounts;

/// What the server reported about one successful query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    /// Server-side execution time in microseconds
    pub internal_micros: u64,
    /// The reply carried no rows
    pub empty: bool,
    pub mutations: MutationCounts,
}

/// Sends one query to the target and waits for its reply.
///
/// Each worker owns its executor exclusively, so implementations hold a
/// single connection and need no internal locking.
#[async_trait]
pub trait QueryExecutor: Send + 'static {
    async fn execute(&mut self, query: &str, read_only: bool) -> Result<QueryOutcome>;
}

#[async_trait]
impl<E: QueryExecutor + ?Sized> QueryExecutor for Box<E> {
    async fn execute(&mut self, query: &str, read_only: bool) -> Result<QueryOutcome> {
        (**self).execute(query, read_only).await
    }
}
