//! Startup declaration of the fixed queue topology.
//!
//! Every queue is declared independently: one refusal does not stop the
//! others, and the outcome of each is reported in a [`TopologyReport`].

use futures::future::join_all;

use crate::broker::BrokerClient;
use crate::error::BrokerError;

/// Durable queues that must exist before mutations are accepted.
pub const TOPOLOGY_QUEUES: [&str; 8] = [
    "new_stories",
    "update_story_info",
    "update_comment_info",
    "new_comments",
    "delete_story",
    "delete_comment",
    "new_images",
    "new_comment_on_story",
];

/// Per-queue outcome of a bootstrap run.
#[derive(Debug, Default)]
pub struct TopologyReport {
    pub declared: Vec<&'static str>,
    pub failed: Vec<(&'static str, BrokerError)>,
}

impl TopologyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Declare every queue in [`TOPOLOGY_QUEUES`].
pub async fn bootstrap_topology(client: &BrokerClient) -> TopologyReport {
    declare_queues(client, &TOPOLOGY_QUEUES).await
}

/// Issue all declarations together and collect each result.
pub async fn declare_queues(client: &BrokerClient, names: &[&'static str]) -> TopologyReport {
    let results = join_all(
        names
            .iter()
            .map(|&name| async move { (name, client.setup_queue(name).await) }),
    )
    .await;

    let mut report = TopologyReport::default();
    for (name, result) in results {
        match result {
            Ok(()) => {
                tracing::info!(queue = %name, "Queue setup completed");
                report.declared.push(name);
            }
            Err(e) => {
                tracing::error!(queue = %name, error = %e, "Failed to set up queue");
                report.failed.push((name, e));
            }
        }
    }
    report
}
