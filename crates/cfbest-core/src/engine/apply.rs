//! Apply executor
//!
//! Issues one writer call per action and records every outcome. A failed
//! call never stops the remaining actions.
//!
//! In concurrent mode actions are grouped by destination record id and each
//! group runs as one task, so two writes to the same record set are never in
//! flight together and keep their plan order.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ApplyMode;
use crate::error::Error;
use crate::planner::ReconciliationAction;
use crate::traits::{Ack, DnsRecordWriter};

/// Result of applying one action
#[derive(Debug)]
pub struct ApplyOutcome {
    pub action: ReconciliationAction,
    pub result: Result<Ack, Error>,
}

impl ApplyOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Apply every action; outcomes come back in plan order
pub async fn apply(
    actions: Vec<ReconciliationAction>,
    writer: Arc<dyn DnsRecordWriter>,
    mode: ApplyMode,
) -> Vec<ApplyOutcome> {
    match mode {
        ApplyMode::Sequential => apply_sequential(actions, writer.as_ref()).await,
        ApplyMode::Concurrent => apply_concurrent(actions, writer).await,
    }
}

async fn apply_sequential(
    actions: Vec<ReconciliationAction>,
    writer: &dyn DnsRecordWriter,
) -> Vec<ApplyOutcome> {
    let mut outcomes = Vec::with_capacity(actions.len());
    for action in actions {
        let result = apply_one(writer, &action).await;
        outcomes.push(ApplyOutcome { action, result });
    }
    outcomes
}

async fn apply_concurrent(
    actions: Vec<ReconciliationAction>,
    writer: Arc<dyn DnsRecordWriter>,
) -> Vec<ApplyOutcome> {
    // Groups in first-seen order, indices in plan order
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (index, action) in actions.iter().enumerate() {
        match groups.iter_mut().find(|(id, _)| *id == action.record_id) {
            Some((_, indices)) => indices.push(index),
            None => groups.push((action.record_id.clone(), vec![index])),
        }
    }

    let mut tasks = JoinSet::new();
    for (_, indices) in groups {
        let writer = Arc::clone(&writer);
        let group: Vec<(usize, ReconciliationAction)> = indices
            .into_iter()
            .map(|index| (index, actions[index].clone()))
            .collect();

        tasks.spawn(async move {
            let mut results = Vec::with_capacity(group.len());
            for (index, action) in group {
                let result = apply_one(writer.as_ref(), &action).await;
                results.push((index, result));
            }
            results
        });
    }

    let mut slots: Vec<Option<Result<Ack, Error>>> = actions.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(results) => {
                for (index, result) in results {
                    slots[index] = Some(result);
                }
            }
            Err(e) => error!("Apply task aborted: {}", e),
        }
    }

    actions
        .into_iter()
        .zip(slots)
        .map(|(action, slot)| {
            let result = slot.unwrap_or_else(|| {
                Err(Error::remote(
                    writer.writer_name(),
                    "apply task terminated before completing this action",
                ))
            });
            ApplyOutcome { action, result }
        })
        .collect()
}

async fn apply_one(writer: &dyn DnsRecordWriter, action: &ReconciliationAction) -> Result<Ack, Error> {
    let values = action.values();
    let result = writer
        .upsert(
            &action.record_id,
            action.record_type,
            &action.record_name,
            action.ttl,
            &values,
        )
        .await;

    match &result {
        Ok(ack) if ack.dry_run => info!(
            "[dry-run] {} {} {} <- {:?}",
            action.carrier, action.record_type, action.record_id, values
        ),
        Ok(_) => info!(
            "Applied {} {} {} <- {:?}",
            action.carrier, action.record_type, action.record_id, values
        ),
        Err(e) => warn!(
            "Failed to apply {} {} {}: {}",
            action.carrier, action.record_type, action.record_id, e
        ),
    }

    result
}
