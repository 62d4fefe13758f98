//! Environment-variable knobs read at startup. Kept in one place so the rest of the
//! crate never calls `std::env::var` directly.

use std::env;

const THREADS_VAR: &str = "NPU_COMBINER_THREADS";
const DEBUG_DIR_VAR: &str = "NPU_COMBINER_DEBUG_DIR";
const DEBUG_PARTS_VAR: &str = "NPU_COMBINER_DEBUG_PARTS";

/// Worker thread count for the combiner's [`crate::thread_pool::ThreadPool`]. Defaults
/// to the number of available cores; `0` forces synchronous execution.
pub fn num_worker_threads() -> usize {
    match env::var(THREADS_VAR) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            log::warn!("{THREADS_VAR}={value:?} is not a valid integer, ignoring");
            default_thread_count()
        }),
        Err(_) => default_thread_count(),
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Directory to write debug dot files into, if set.
pub fn debug_dir() -> Option<String> {
    env::var(DEBUG_DIR_VAR).ok()
}

/// Parts to restrict debug dumps to, if set (comma-separated part indices). An empty
/// result means "dump everything".
pub fn debug_parts() -> Vec<crate::part::PartId> {
    match env::var(DEBUG_PARTS_VAR) {
        Ok(value) => value
            .split(',')
            .filter_map(|s| s.trim().parse::<usize>().ok())
            .map(crate::part::PartId)
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_debug_parts_is_empty() {
        env::remove_var(DEBUG_PARTS_VAR);
        assert!(debug_parts().is_empty());
    }
}
