//! Request-scoped logging context.
//!
//! The request id is generated once per call and carried in task-local storage so that
//! every log line emitted while handling the call can include it without threading it
//! through each function.

tokio::task_local! {
    /// Task-local storage for the current request ID.
    pub static REQUEST_ID: String;
}

tokio::task_local! {
    /// Task-local storage for the namespace the current call was routed to.
    pub static NAMESPACE_CONTEXT: String;
}

/// Get the current request ID from context, if set.
///
/// Returns an empty string if no request ID is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Get the current namespace from context, if set.
pub fn get_namespace_context() -> String {
    NAMESPACE_CONTEXT
        .try_with(|ns| ns.clone())
        .unwrap_or_default()
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
