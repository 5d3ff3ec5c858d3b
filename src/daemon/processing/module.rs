use anyhow::Result;

use crate::daemon::collection::activity::ActivityEvent;

/// Represents an event processor. Anything that wants to see activity events as they happen sits
/// behind this, currently only the on-disk activity log.
pub trait EventProcessor {
    fn process_next(
        &mut self,
        message: ActivityEvent,
    ) -> impl std::future::Future<Output = Result<()>>;

    fn finalize(&mut self) -> impl std::future::Future<Output = Result<()>>;
}
