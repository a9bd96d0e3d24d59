//! Logging shim: `tracing` events that compile to nothing unless the
//! `tracing` feature is enabled.

macro_rules! trace_event {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)*);
        }
    }};
}

pub(crate) use trace_event;
