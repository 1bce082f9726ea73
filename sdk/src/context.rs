use std::cell::RefCell;

tokio::task_local! {
    pub static TRACE_CONTEXT: RefCell<TraceContext>;
}

/// Propagates through async tasks so tracked HTTP calls reuse the same
/// trace id as the request that started them.
#[derive(Clone, Debug)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    pub fn new(trace_id: String) -> Self {
        Self { trace_id }
    }
}

/// Returns the trace id of the currently running request, if any.
pub fn current_trace_id() -> Option<String> {
    TRACE_CONTEXT
        .try_with(|ctx| ctx.borrow().trace_id.clone())
        .ok()
}
