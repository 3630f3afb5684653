/*!
 * Contention Monitoring
 * Lock wait/hold profiling with serializable snapshots
 */

mod profiler;
mod tracer;

pub use profiler::{ContentionSeverity, LockProfiler, LockSnapshot, ProfilerSnapshot};
pub use tracer::init_tracing;
