use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use collection::{
    activity::ActivityEvent, background::BackgroundSampler, collector::DataCollectionModule,
    foreground::ForegroundSampler,
};
use config::EngineConfig;
use coordinator::{Accumulators, Collaborators, Coordinator};
use processing::{log_writer::ActivityLogWriter, ProcessingModule};
use report::sink::LocalReportSink;
use storage::activity_log::ActivityLogImpl;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    utils::clock::{Clock, DefaultClock},
    window_api::{GenericObservationSource, ObservationSource},
};

pub mod args;
pub mod categorize;
pub mod collection;
pub mod config;
pub mod coordinator;
pub mod processing;
pub mod report;
pub mod sessions;
pub mod shutdown;
pub mod storage;

pub const SNAPSHOT_DIR: &str = "snapshots";
pub const ACTIVITY_DIR: &str = "activity";
pub const REPORT_DIR: &str = "reports";
pub const TIMING_STATE_FILE: &str = "timing_state.json";

const EVENT_BUFFER: usize = 64;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf) -> Result<()> {
    let dir = std::path::absolute(dir)?;
    std::env::set_current_dir("/")?;

    let config = EngineConfig::load(&dir);
    info!("Starting with {config:?}");
    let source: Arc<dyn ObservationSource> = Arc::new(GenericObservationSource::new()?);
    let collaborators = Collaborators {
        sink: Arc::new(LocalReportSink::new(dir.join(REPORT_DIR))),
        markers: None,
    };

    let shutdown_token = CancellationToken::new();
    let engine = async {
        let result = run_engine(
            &dir,
            config,
            source,
            collaborators,
            Arc::new(DefaultClock),
            shutdown_token.clone(),
        )
        .await;
        // Lets the signal listener go if the engine failed on its own.
        shutdown_token.cancel();
        result
    };

    let (_, engine_result) = tokio::join!(shutdown::detect_shutdown(shutdown_token.clone()), engine);
    engine_result
}

/// Runs collectors, coordinator and activity log until `shutdown` fires, then shuts them down
/// in order: collectors flush first, the coordinator saves after them, the log drains last.
pub async fn run_engine(
    app_dir: &Path,
    config: EngineConfig,
    source: Arc<dyn ObservationSource>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (sender, receiver) = mpsc::channel::<ActivityEvent>(EVENT_BUFFER);
    let accumulators = Accumulators::new(config.min_dwell);
    let processor = create_processor(app_dir.join(ACTIVITY_DIR), receiver)?;

    let mut coordinator = Coordinator::new(
        app_dir,
        config.clone(),
        clock.clone(),
        accumulators.clone(),
        collaborators,
        sender.clone(),
        shutdown.clone(),
    )
    .await?;
    coordinator.startup().await;

    let foreground = DataCollectionModule::new(
        sender.clone(),
        ForegroundSampler::new(
            source.clone(),
            accumulators.foreground.clone(),
            config.observation_timeout,
        ),
        shutdown.clone(),
        config.sample_interval,
        clock.clone(),
    );
    let background = DataCollectionModule::new(
        sender,
        BackgroundSampler::new(
            source,
            accumulators.background.clone(),
            config.observation_timeout,
        ),
        shutdown,
        config.sample_interval,
        clock,
    );

    let coordinating = async move {
        let (_, foreground_result, background_result) =
            tokio::join!(coordinator.run(), foreground.run(), background.run());

        if let Err(e) = foreground_result {
            error!("Foreground collector got an error {e:?}");
        }
        if let Err(e) = background_result {
            error!("Background collector got an error {e:?}");
        }

        coordinator.finish().await;
        // Dropping the coordinator drops the last sender, which ends the processing module.
    };

    let (_, processing_result) = tokio::join!(coordinating, processor.run());

    if let Err(processing_result) = &processing_result {
        error!("Processing module got an error {:?}", processing_result);
    }
    processing_result
}

fn create_processor(
    activity_dir: PathBuf,
    receiver: mpsc::Receiver<ActivityEvent>,
) -> Result<ProcessingModule<ActivityLogWriter<ActivityLogImpl>>, anyhow::Error> {
    let log = ActivityLogImpl::new(activity_dir)?;
    let writer = ActivityLogWriter::new(log);
    Ok(ProcessingModule::new(receiver, writer))
}
