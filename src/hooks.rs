//! Process-wide hooks for errors that would otherwise vanish.
//!
//! When a pipeline terminates with an error and the subscriber installed no
//! error callback, the failure is routed here instead of being dropped on
//! the floor. The default handler logs at error level; applications that
//! want to crash, count, or forward such failures register their own with
//! [`on_dropped_error`] and remove it again with [`reset_dropped_error`].
//!
//! Registration is explicit and global. Libraries should leave the hook
//! alone; the application owns it.

use crate::error::Failure;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

type Handler = Box<dyn Fn(&Failure) + Send + Sync>;

static DROPPED_ERROR: ArcSwapOption<Handler> = ArcSwapOption::const_empty();

/// Install the process-wide dropped-error handler, replacing any previous
/// one. The handler runs on whichever task delivered the unhandled error,
/// so it must not block.
pub fn on_dropped_error<F>(handler: F)
where
    F: Fn(&Failure) + Send + Sync + 'static,
{
    DROPPED_ERROR.store(Some(Arc::new(Box::new(handler))));
}

/// Remove the registered handler and restore the logging default.
pub fn reset_dropped_error() {
    DROPPED_ERROR.store(None);
}

/// Route a terminal error that no subscriber callback consumed.
pub(crate) fn dropped_error(failure: &Failure) {
    match &*DROPPED_ERROR.load() {
        Some(handler) => handler(failure),
        None => {
            tracing::error!(%failure, "Unhandled terminal error in pipeline");
        }
    }
}
