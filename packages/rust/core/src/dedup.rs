//! Skip/process partitioning against previously stored results.

use tracing::{debug, info, warn};

use sitesort_shared::{ClassificationResult, Domain};

use crate::store::ResultStore;

/// Which domains reuse a stored result and which are processed afresh.
#[derive(Debug, Clone, Default)]
pub struct DedupPlan {
    /// Domains with a prior non-`Error` result, paired with that result.
    pub skip: Vec<ClassificationResult>,
    pub process: Vec<Domain>,
}

/// Split `valid` into skip and process sets.
///
/// With `overwrite` everything is processed. A store failure during lookup
/// also processes everything; it never fails the batch.
pub async fn partition_domains(
    valid: Vec<Domain>,
    overwrite: bool,
    store: &dyn ResultStore,
) -> DedupPlan {
    if overwrite {
        debug!(count = valid.len(), "overwrite enabled, processing all domains");
        return DedupPlan {
            skip: Vec::new(),
            process: valid,
        };
    }

    let mut plan = DedupPlan::default();
    for domain in &valid {
        match store.get_existing(domain).await {
            Ok(Some(existing)) => plan.skip.push(existing),
            Ok(None) => plan.process.push(domain.clone()),
            Err(e) => {
                warn!(error = %e, "result store lookup failed, processing all domains");
                return DedupPlan {
                    skip: Vec::new(),
                    process: valid,
                };
            }
        }
    }

    info!(
        skip = plan.skip.len(),
        process = plan.process.len(),
        "partitioned domains"
    );
    plan
}
