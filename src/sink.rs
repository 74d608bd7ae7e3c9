// SPDX-License-Identifier: MIT
//
// Injectable error-reporting callback, standing in for a
// `(message, object, name)`-style error-sink callable; the object/name
// context already lives on each `AllocError` variant's `label` field, so
// the sink only needs the error itself.

use crate::error::AllocError;

/// Receives every allocator failure before it is returned to the caller.
pub trait ErrorSink {
    fn report(&self, err: &AllocError);
}

/// Default sink: routes allocation failures through the `log` crate.
/// Double-free and mode-misuse reports are warnings (the caller's bug, not
/// a resource exhaustion); everything else is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, err: &AllocError) {
        match err {
            AllocError::DoubleFree { .. } | AllocError::ModeMisuse { .. } => {
                log::warn!("{err}");
            }
            _ => log::error!("{err}"),
        }
    }
}

/// A sink that discards every report. Useful in tests that assert on the
/// returned `Result` and don't want log noise for expected failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullErrorSink;

impl ErrorSink for NullErrorSink {
    fn report(&self, _err: &AllocError) {}
}
