use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::{fs::operations::write_replacing, utils::time::date_to_record_name};

use super::summary::ProductivitySummary;

/// Where finished reports go. A report only counts as sent when `deliver` returns `Ok`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, summary: &ProductivitySummary) -> Result<()>;
}

/// Writes each report as `<dir>/report_<YYYY-MM-DD>.json`. Later reports of the same day replace
/// earlier ones.
pub struct LocalReportSink {
    dir: PathBuf,
}

impl LocalReportSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, summary: &ProductivitySummary) -> PathBuf {
        self.dir
            .join(format!("report_{}.json", date_to_record_name(summary.date)))
    }
}

#[async_trait]
impl ReportSink for LocalReportSink {
    async fn deliver(&self, summary: &ProductivitySummary) -> Result<()> {
        let path = self.path_for(summary);
        let bytes = serde_json::to_vec_pretty(summary)?;
        write_replacing(&path, &bytes).await?;
        info!("Report for {} written to {path:?}", summary.date);
        Ok(())
    }
}
