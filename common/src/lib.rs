pub mod logger;

pub use logger::{TraceId, child_span, init_logger, root_span, warn_if_slow};
