/*!
 * Monitoring
 * Structured tracing setup and operation spans
 */

mod tracer;

pub use tracer::{
    generate_trace_id, init_tracing, span_operation, try_init_tracing, OperationSpan,
    SLOW_OPERATION_THRESHOLD, TRACE_JSON_ENV,
};
