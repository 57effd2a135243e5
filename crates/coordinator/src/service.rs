//! CoordinatorService - wires the registry, sync scheduler, sessions and
//! connection handling together

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use clock_sync::SyncScheduler;
use contracts::{CameraGeometry, CoordinatorConfig, QualityAssessor, SyncStatusSource};
use dispatcher::{CommandDispatcher, DeviceRegistry};

use crate::connection::ConnectionManager;
use crate::coordinator::SessionCoordinator;
use crate::error::CoordinatorError;
use crate::pipeline::CalibrationPipeline;
use crate::processor::ResponseProcessor;
use crate::session::SessionStore;

struct Running {
    scheduler_cancel: CancellationToken,
    scheduler_task: JoinHandle<()>,
    consumer_cancel: CancellationToken,
    consumer_task: JoinHandle<()>,
}

/// Builder for [`CoordinatorService`]
pub struct CoordinatorServiceBuilder {
    config: CoordinatorConfig,
    geometry: Option<Arc<dyn CameraGeometry>>,
    assessor: Option<Arc<dyn QualityAssessor>>,
}

impl CoordinatorServiceBuilder {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            geometry: None,
            assessor: None,
        }
    }

    /// Geometry library used for stereo calibration
    pub fn geometry(mut self, geometry: Arc<dyn CameraGeometry>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Local image scorer; without one the device's own verdict is used
    pub fn assessor(mut self, assessor: Arc<dyn QualityAssessor>) -> Self {
        self.assessor = Some(assessor);
        self
    }

    pub fn build(self) -> CoordinatorService {
        let config = self.config;
        let registry = Arc::new(DeviceRegistry::new(config.dispatcher.outbound_capacity));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&registry),
            config.dispatcher.inbound_capacity,
        ));
        let scheduler = Arc::new(SyncScheduler::new(config.clock_sync.clone()));
        let store = Arc::new(SessionStore::new());

        let mut sessions = SessionCoordinator::new(
            config.session.clone(),
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&scheduler) as Arc<dyn SyncStatusSource>,
        );
        let pipeline = self.geometry.map(|geometry| {
            Arc::new(CalibrationPipeline::new(
                store,
                geometry,
                config.session.min_stereo_pairs,
            ))
        });
        if let Some(pipeline) = &pipeline {
            sessions = sessions.with_pipeline(Arc::clone(pipeline));
        }
        let sessions = Arc::new(sessions);

        let mut processor = ResponseProcessor::new(Arc::clone(&sessions));
        if let Some(assessor) = self.assessor {
            processor = processor.with_assessor(assessor);
        }

        let connections = ConnectionManager::new(
            config.network.clone(),
            Arc::clone(&dispatcher),
            Some(Arc::clone(&scheduler)),
        );

        CoordinatorService {
            config,
            registry,
            dispatcher,
            scheduler,
            sessions,
            pipeline,
            processor: Arc::new(processor),
            connections,
            running: Mutex::new(None),
        }
    }
}

/// The calibration coordinator: one device listener, one clock-sync
/// scheduler, one processing loop.
pub struct CoordinatorService {
    config: CoordinatorConfig,
    registry: Arc<DeviceRegistry>,
    dispatcher: Arc<CommandDispatcher>,
    scheduler: Arc<SyncScheduler>,
    sessions: Arc<SessionCoordinator>,
    pipeline: Option<Arc<CalibrationPipeline>>,
    processor: Arc<ResponseProcessor>,
    connections: ConnectionManager,
    running: Mutex<Option<Running>>,
}

impl CoordinatorService {
    pub fn builder(config: CoordinatorConfig) -> CoordinatorServiceBuilder {
        CoordinatorServiceBuilder::new(config)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn sessions(&self) -> &Arc<SessionCoordinator> {
        &self.sessions
    }

    pub fn pipeline(&self) -> Option<&Arc<CalibrationPipeline>> {
        self.pipeline.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the processing loop, the sync scheduler and the listener.
    ///
    /// A service runs once; starting it again after `stop` fails.
    #[instrument(name = "coordinator_start", skip(self))]
    pub async fn start(&self) -> Result<SocketAddr, CoordinatorError> {
        if self.is_running() {
            return Err(CoordinatorError::AlreadyRunning);
        }

        let consumer_cancel = CancellationToken::new();
        let consumer_task = self
            .dispatcher
            .spawn_consumer(Arc::clone(&self.processor), consumer_cancel.clone())?;

        let scheduler_cancel = CancellationToken::new();
        let scheduler_task = self.scheduler.spawn(scheduler_cancel.clone());

        let addr = match self.connections.start().await {
            Ok(addr) => addr,
            Err(e) => {
                scheduler_cancel.cancel();
                consumer_cancel.cancel();
                join_background("sync scheduler", scheduler_task).await;
                join_background("processing loop", consumer_task).await;
                return Err(e);
            }
        };

        *self.running.lock() = Some(Running {
            scheduler_cancel,
            scheduler_task,
            consumer_cancel,
            consumer_task,
        });

        info!(
            addr = %addr,
            clock_port = self.config.clock_sync.port,
            "Coordinator started"
        );
        Ok(addr)
    }

    /// Stop accepting, close device links, then stop the sync scheduler and
    /// finally the processing loop once its queue is drained.
    #[instrument(name = "coordinator_stop", skip(self))]
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        self.connections.stop().await;
        self.registry.shutdown_links().await;

        running.scheduler_cancel.cancel();
        join_background("sync scheduler", running.scheduler_task).await;

        running.consumer_cancel.cancel();
        join_background("processing loop", running.consumer_task).await;

        self.sessions.wait_calibrations().await;
        info!("Coordinator stopped");
    }
}

async fn join_background(task: &'static str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(task, error = ?e, "Background task panicked");
    }
}
