//! Helpers for the bounded log buffer kept on every instance.

/// Keeps only the most recent `max_size` bytes.
pub fn shrink_to_max_size(logs: Vec<u8>, max_size: usize) -> Vec<u8> {
    if logs.len() <= max_size {
        return logs;
    }
    logs[logs.len() - max_size..].to_vec()
}

/// Decides whether a freshly fetched log should replace the stored one.
///
/// A shorter fetch never replaces a longer stored log, and identical buffers are not
/// written again.
pub fn should_update_logs(old: Option<&[u8]>, new: Option<&[u8]>) -> bool {
    let Some(new) = new else {
        return false;
    };
    let Some(old) = old else {
        return true;
    };
    if new.len() < old.len() {
        return false;
    }
    new != old
}

/// Extracts the sandbox id from a resource link (its last path segment).
pub fn resource_id(resource_ref: &str) -> &str {
    resource_ref
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(resource_ref)
}
