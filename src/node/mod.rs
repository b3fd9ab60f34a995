//! # Node Module - Orchestration Loop
//!
//! The single-threaded control loop that ties sampling cadence, durable
//! buffering, and network delivery together. One iteration per second:
//! service both link monitors, then fire whichever of the two timers
//! (sample, status) have elapsed. The sampling path is write-first: every
//! reading is archived and buffered before any delivery is attempted, so
//! a dead broker can never cost data that reached the disk.
//!
//! Two conditions end the process instead of being handled in place: a
//! link passing its retry ceiling (the run loop returns an error and the
//! binary exits non-zero) and a watchdog stall (a background task kills
//! the process when no tick completes within the configured deadline).
//! Both rely on a service manager restarting the node.

pub mod payload;
pub mod reconcile;
pub mod state;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info, warn};

use crate::clock::{SystemClock, TimeSource};
use crate::config::Config;
use crate::link::probe::NetworkLink;
use crate::link::{LinkMonitor, LinkState};
use crate::logutil::escape_log;
use crate::sensors::{apply_bounds, SensorSource, SimulatedSensors};
use crate::storage::archive::ArchiveLog;
use crate::storage::BufferQueue;
use crate::transport::{MqttTransport, Transport};

use reconcile::Reconciler;
use state::RuntimeCounters;

pub struct Node {
    config: Config,
    clock: Box<dyn TimeSource>,
    sensors: Box<dyn SensorSource>,
    transport: Box<dyn Transport>,
    queue: Option<BufferQueue>,
    archive: Option<ArchiveLog>,
    network: NetworkLink,
    broker: LinkMonitor,
    reconciler: Reconciler,
    counters: RuntimeCounters,
    boot_notes: Vec<String>,
    announce_pending: bool,
    last_sample: Instant,
    last_status: Instant,
}

impl Node {
    /// Build a node with the default collaborators: simulated sensors and
    /// the MQTT transport from the configuration.
    pub fn new(config: Config) -> Result<Self> {
        let transport = MqttTransport::new(config.mqtt.clone(), config.device.id.clone());
        Self::with_parts(
            config,
            Box::new(SimulatedSensors::new()),
            Box::new(transport),
        )
    }

    /// Build a node around injected sensor and transport collaborators.
    /// This is the seam the integration tests use.
    pub fn with_parts(
        config: Config,
        sensors: Box<dyn SensorSource>,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let data_dir = PathBuf::from(&config.storage.data_dir);
        let counters = RuntimeCounters::load(&data_dir);

        let mut boot_notes = Vec::new();
        let queue = match BufferQueue::open(
            data_dir.join("buffer.jsonl"),
            config.storage.max_backlog,
        ) {
            Ok(queue) => Some(queue),
            Err(e) => {
                warn!("buffer store unavailable: {} (running without local durability)", e);
                boot_notes.push("buffer store unavailable at boot".to_string());
                None
            }
        };
        let archive = match ArchiveLog::new(data_dir.join("archive")) {
            Ok(archive) => Some(archive),
            Err(e) => {
                warn!("archive unavailable: {}", e);
                boot_notes.push("archive unavailable at boot".to_string());
                None
            }
        };

        let network = NetworkLink::new(&config.network);
        let broker = LinkMonitor::new(
            "broker",
            Duration::from_secs(config.mqtt.backoff_base_secs),
            Duration::from_secs(config.mqtt.backoff_cap_secs),
            config.mqtt.max_retries,
        );
        let reconciler = Reconciler::new(config.mqtt.topic_data.clone(), config.sampling.flush_batch);

        let sample_interval = Duration::from_secs(config.sampling.sensor_interval_secs);
        let status_interval = Duration::from_secs(config.sampling.status_interval_secs);
        let now = Instant::now();

        Ok(Node {
            config,
            clock: Box::new(SystemClock::new()),
            sensors,
            transport,
            queue,
            archive,
            network,
            broker,
            reconciler,
            counters,
            boot_notes,
            announce_pending: false,
            // Start both timers already elapsed so the first tick samples
            // and reports immediately.
            last_sample: now.checked_sub(sample_interval).unwrap_or(now),
            last_status: now.checked_sub(status_interval).unwrap_or(now),
        })
    }

    pub fn counters(&self) -> &RuntimeCounters {
        &self.counters
    }

    pub fn backlog(&self) -> usize {
        self.queue.as_ref().map(BufferQueue::count).unwrap_or(0)
    }

    pub fn broker_state(&self) -> LinkState {
        self.broker.state()
    }

    /// Run until ctrl-c or a fatal condition.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "node '{}' at '{}' started (boot #{}, backlog {})",
            self.config.device.id,
            self.config.device.location,
            self.counters.boot_count,
            self.backlog(),
        );

        let start = Instant::now();
        let heartbeat = Arc::new(AtomicU64::new(0));
        let watchdog = self.arm_watchdog(start, heartbeat.clone());

        let sample_interval = Duration::from_secs(self.config.sampling.sensor_interval_secs);
        let status_interval = Duration::from_secs(self.config.sampling.status_interval_secs);

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    heartbeat.store(start.elapsed().as_secs(), Ordering::SeqCst);

                    if let Err(fatal) = self.maintain_links().await {
                        error!("{}", fatal);
                        if let Some(handle) = &watchdog {
                            handle.abort();
                        }
                        return Err(fatal.into());
                    }

                    if self.last_sample.elapsed() >= sample_interval {
                        self.last_sample = Instant::now();
                        self.sample_tick().await;
                    }
                    if self.last_status.elapsed() >= status_interval {
                        self.last_status = Instant::now();
                        self.status_tick().await;
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("received shutdown signal");
                    break;
                }
            }
        }

        if let Some(handle) = &watchdog {
            handle.abort();
        }
        // Retained farewell so subscribers see a clean offline instead of
        // waiting for the Last Will.
        if self.transport.is_connected() {
            let goodbye = format!(
                "{{\"device\":\"{}\",\"status\":\"offline\"}}",
                self.config.device.id
            );
            let topic = self.config.mqtt.topic_status.clone();
            let _ = self.transport.publish(&topic, &goodbye, true).await;
        }
        info!("shutdown complete ({} records still buffered)", self.backlog());
        Ok(())
    }

    fn arm_watchdog(
        &self,
        start: Instant,
        heartbeat: Arc<AtomicU64>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let timeout = self.config.watchdog.timeout_secs;
        if timeout == 0 {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let last_beat = heartbeat.load(Ordering::SeqCst);
                let now = start.elapsed().as_secs();
                if now.saturating_sub(last_beat) > timeout {
                    error!(
                        "watchdog: no tick completed in {}s, terminating for restart",
                        timeout
                    );
                    std::process::exit(1);
                }
            }
        }))
    }

    /// Service both link state machines: at most one attempt each, never
    /// blocking beyond the configured probe/connect timeouts.
    pub async fn maintain_links(&mut self) -> Result<(), crate::link::RetryExhausted> {
        self.network.maintain().await?;

        let now = Instant::now();
        match self.broker.state() {
            LinkState::Connected => {
                if !self.transport.is_connected() {
                    warn!("broker session dropped");
                    self.broker.dropped();
                }
            }
            LinkState::Disconnected | LinkState::Connecting => {
                if self.broker.attempt_due(now) {
                    self.broker.begin_attempt(now);
                    info!(
                        "broker connect attempt {} to {}:{}",
                        self.broker.retries() + 1,
                        self.config.mqtt.host,
                        self.config.mqtt.port
                    );
                    if self.transport.connect().await {
                        self.broker.connected();
                        self.announce_pending = true;
                    } else if let Some(fatal) = self.broker.attempt_failed() {
                        return Err(fatal);
                    }
                }
            }
        }

        if self.announce_pending && self.transport.is_connected() {
            self.announce().await;
        }
        Ok(())
    }

    /// First words after (re)connecting: a status record plus any boot
    /// degradations that could not be reported earlier.
    async fn announce(&mut self) {
        self.announce_pending = false;
        let notes = std::mem::take(&mut self.boot_notes);
        let error_topic = self.config.mqtt.topic_error.clone();
        for note in notes {
            let report = payload::error_payload(&self.config.device, &note);
            if !self.transport.publish(&error_topic, &report, false).await {
                debug!("boot note not delivered: {}", note);
            }
        }
        self.status_tick().await;
    }

    /// One sampling cycle: read, persist, then try to deliver.
    pub async fn sample_tick(&mut self) {
        self.counters.reading_count += 1;
        let reading = apply_bounds(self.sensors.read());
        let record = payload::data_payload(
            &self.config.device,
            self.clock.as_ref(),
            &self.counters,
            &reading,
        );
        debug!(
            "reading #{}: {}",
            self.counters.reading_count,
            escape_log(&record)
        );

        // Permanent copy first; archival failure never blocks delivery.
        if let Some(archive) = &self.archive {
            let label = self.clock.date_label();
            if let Err(e) = archive.append(&label, &record) {
                warn!("archive append failed: {}", e);
            }
        }

        // Write-first buffering. An append failure means this reading is
        // lost unless the immediate publish lands; that loss is explicit.
        let buffered = match self.queue.as_mut() {
            Some(queue) => match queue.append(&record) {
                Ok(()) => true,
                Err(e) => {
                    warn!("buffer append failed: {} (reading at risk)", e);
                    false
                }
            },
            None => false,
        };

        // Immediate publish of the fresh reading. This path never touches
        // older backlog: the fresh record is dropped from the queue only
        // when it is the sole entry, i.e. tail == head.
        if self.transport.is_connected() {
            let topic = self.config.mqtt.topic_data.clone();
            if self.transport.publish(&topic, &record, false).await {
                if buffered {
                    if let Some(queue) = self.queue.as_mut() {
                        if queue.count() == 1 {
                            queue.pop_oldest();
                        }
                    }
                }
            } else {
                self.counters.publish_failures += 1;
                warn!(
                    "publish failed (total {}), reading stays buffered",
                    self.counters.publish_failures
                );
            }
        } else {
            self.counters.publish_failures += 1;
            debug!(
                "broker offline (failures {}), reading buffered",
                self.counters.publish_failures
            );
        }

        // Opportunistic backlog reconciliation in the same tick.
        if self.transport.is_connected() {
            let Node {
                ref mut queue,
                ref mut transport,
                ref reconciler,
                ..
            } = *self;
            if let Some(queue) = queue.as_mut() {
                if queue.count() > 0 {
                    reconciler.drain(queue, transport.as_mut()).await;
                }
            }
        }
    }

    /// Publish the periodic retained status record. Non-critical: failure
    /// is logged, never retried.
    pub async fn status_tick(&mut self) {
        let status = payload::status_payload(
            &self.config.device,
            self.clock.as_ref(),
            &self.counters,
            self.network.is_up(),
            self.transport.is_connected(),
            self.queue.is_some(),
            self.backlog(),
        );
        info!("status: {}", escape_log(&status));
        if self.transport.is_connected() {
            let topic = self.config.mqtt.topic_status.clone();
            if !self.transport.publish(&topic, &status, true).await {
                debug!("status publish failed");
            }
        }
    }
}
