//! Logging utilities for the pool crates

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

/// Emits a structured trace event: an event name and a JSON object of
/// parameters, rendered through `tracing::trace!`.
#[macro_export]
macro_rules! pool_trace {
    ($evt:expr, $params:tt) => {
        tracing::trace!(
            "pool_trace:{}:{}",
            $evt,
            serde_json::json!($params).to_string()
        );
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_trace_macro_expands() {
        pool_trace!("test.event", { "key": 42 });
    }
}
