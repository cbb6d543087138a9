//! Pure state-machine rules applied before any mutation of an instance.

use crate::core::{Closure, ClosureError, ClosurePatch, Result, TaskStage, shrink_to_max_size};
use tracing::debug;

/// Checks a regular update against the instance's current state.
///
/// Done instances only reach this for patches that try to change their state.
pub fn verify_patch(current: &Closure, patch: &ClosurePatch) -> Result<()> {
    match current.state {
        TaskStage::Created | TaskStage::Cancelled => verify_ready_patch(current, patch),
        TaskStage::Started => verify_leased_patch(current, patch),
        TaskStage::Finished | TaskStage::Failed => verify_done_patch(current, patch),
    }
}

fn verify_ready_patch(current: &Closure, patch: &ClosurePatch) -> Result<()> {
    match patch.state {
        None => Ok(()),
        Some(requested) if requested == current.state => Ok(()),
        // failed while preparing the instance
        Some(TaskStage::Failed) if current.state == TaskStage::Created => Ok(()),
        Some(requested) => Err(ClosureError::IllegalTransition {
            current: current.state,
            requested,
        }),
    }
}

fn verify_leased_patch(current: &Closure, patch: &ClosurePatch) -> Result<()> {
    if let Some(requested @ (TaskStage::Created | TaskStage::Cancelled)) = patch.state {
        return Err(ClosureError::IllegalTransition {
            current: current.state,
            requested,
        });
    }

    if patch.concurrency_token != current.concurrency_token {
        return Err(ClosureError::ConcurrencyViolation {
            expected: current.concurrency_token.clone(),
            actual: patch.concurrency_token.clone(),
        });
    }

    Ok(())
}

fn verify_done_patch(current: &Closure, patch: &ClosurePatch) -> Result<()> {
    match patch.state {
        None => Ok(()),
        Some(requested) if requested == current.state => Ok(()),
        Some(requested) => Err(ClosureError::IllegalTransition {
            current: current.state,
            requested,
        }),
    }
}

/// Done instance receiving a patch without a state change: only the log may move.
pub fn is_log_only_update(current: &Closure, patch: &ClosurePatch) -> bool {
    current.state.is_done() && patch.state.is_none_or(|requested| requested == current.state)
}

/// Partial merge: every field present in the patch overwrites, absent fields stay.
///
/// Output keys are fixed at creation, so values for undeclared outputs are dropped. The
/// concurrency token is never taken from a patch.
pub fn merge_patch(
    current: &Closure,
    patch: ClosurePatch,
    now_millis: i64,
    max_log_size: usize,
) -> Closure {
    let mut next = current.clone();

    if let Some(resource_refs) = patch.resource_refs {
        next.resource_refs = resource_refs;
    }
    if let Some(inputs) = patch.inputs {
        next.inputs = inputs;
    }
    if let Some(outputs) = patch.outputs {
        for (name, value) in outputs {
            match next.outputs.get_mut(&name) {
                Some(slot) => *slot = value,
                None => debug!(closure_id = %current.id, output = %name, "dropping undeclared output"),
            }
        }
    }
    if let Some(error_message) = patch.error_message {
        next.error_message = Some(error_message);
    }
    if let Some(callback) = patch.caller_callback {
        next.caller_callback = Some(callback);
    }
    if let Some(logs) = patch.logs {
        next.logs = Some(shrink_to_max_size(logs, max_log_size));
    }
    if let Some(state) = patch.state {
        if state != current.state && state.is_done() {
            next.end_time_millis = now_millis;
        }
        next.state = state;
    }

    next
}

/// Applies only the log buffer of a patch.
pub fn merge_logs_only(current: &Closure, patch: &ClosurePatch, max_log_size: usize) -> Option<Closure> {
    let logs = patch.logs.as_ref()?;
    let mut next = current.clone();
    next.logs = Some(shrink_to_max_size(logs.clone(), max_log_size));
    Some(next)
}
