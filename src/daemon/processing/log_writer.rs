use anyhow::Result;

use crate::daemon::{
    collection::activity::ActivityEvent,
    storage::activity_log::{ActivityFileHandle, ActivityLog},
};

use super::module::EventProcessor;

/// Bridges [ProcessingModule](super::ProcessingModule) and [ActivityLog]. Keeps the file of the
/// current day open and switches files when an event belongs to another day.
pub struct ActivityLogWriter<L: ActivityLog> {
    log: L,
    current_handle: Option<L::LogFile>,
}

impl<L: ActivityLog> ActivityLogWriter<L> {
    pub fn new(log: L) -> Self {
        Self {
            log,
            current_handle: None,
        }
    }

    async fn move_file_handle(&mut self, event: &ActivityEvent) -> Result<L::LogFile> {
        let current_file = self.current_handle.take();
        let date = event.local_moment().date();

        match current_file {
            Some(mut file) if file.get_date() != date => {
                file.flush().await?;
            }
            Some(v) => return Ok(v),
            None => {}
        };
        self.log.open_for_append(date).await
    }
}

impl<L: ActivityLog> EventProcessor for ActivityLogWriter<L> {
    async fn process_next(&mut self, message: ActivityEvent) -> Result<()> {
        let mut active_file = self.move_file_handle(&message).await?;

        let result = active_file.append(vec![message]).await;
        self.current_handle = Some(active_file);
        result
    }

    async fn finalize(&mut self) -> Result<()> {
        if let Some(v) = self.current_handle.as_mut() {
            v.flush().await?;
        }
        Ok(())
    }
}
