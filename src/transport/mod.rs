//! # Transport Module - Broker Session
//!
//! The delivery side of the node. [`Transport`] is the capability the
//! orchestrator and reconciler hold: connect, publish one payload to a
//! topic, report liveness. [`MqttTransport`] implements it over rumqttc.
//!
//! Session shape: every connect attempt builds a fresh client and event
//! loop, waits a bounded time for the broker's ConnAck, then hands the
//! event loop to a background driver task. The driver does nothing but
//! poll; the first session error flips the shared connected flag and
//! exits, which the supervisor observes as a link drop. A Last Will
//! publishes the retained offline status if the session dies without a
//! goodbye, and a retained online status is announced after each connect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, TlsConfiguration};
use tokio::task::JoinHandle;

use crate::config::MqttConfig;

/// Broker-facing capability. Object-safe so tests can substitute a
/// scripted double.
#[async_trait]
pub trait Transport: Send {
    /// Try to establish a session. Bounded by the configured connect
    /// timeout; returns whether the broker acknowledged.
    async fn connect(&mut self) -> bool;

    /// Publish one payload. Returns `false` when the session is down or
    /// the client rejected the publish; the caller decides what that
    /// means (buffering, failure counters).
    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool;

    fn is_connected(&self) -> bool;
}

pub struct MqttTransport {
    cfg: MqttConfig,
    device_id: String,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn new(cfg: MqttConfig, device_id: String) -> Self {
        MqttTransport {
            cfg,
            device_id,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            driver: None,
        }
    }

    fn offline_payload(&self) -> String {
        format!("{{\"device\":\"{}\",\"status\":\"offline\"}}", self.device_id)
    }

    fn online_payload(&self) -> String {
        format!(
            "{{\"device\":\"{}\",\"status\":\"online\",\"firmware\":\"{}\"}}",
            self.device_id,
            env!("CARGO_PKG_VERSION")
        )
    }

    fn build_options(&self) -> Option<MqttOptions> {
        let mut opts = MqttOptions::new(&self.cfg.client_id, &self.cfg.host, self.cfg.port);
        opts.set_keep_alive(Duration::from_secs(self.cfg.keepalive_secs));
        if let (Some(user), Some(pass)) = (&self.cfg.username, &self.cfg.password) {
            opts.set_credentials(user.clone(), pass.clone());
        }
        opts.set_last_will(LastWill::new(
            &self.cfg.topic_status,
            self.offline_payload().into_bytes(),
            QoS::AtLeastOnce,
            true,
        ));
        if let Some(ca_path) = &self.cfg.ca_cert_path {
            match std::fs::read(ca_path) {
                Ok(ca) => {
                    opts.set_transport(rumqttc::Transport::Tls(TlsConfiguration::Simple {
                        ca,
                        alpn: None,
                        client_auth: None,
                    }));
                }
                Err(e) => {
                    warn!("cannot read CA certificate {}: {}", ca_path, e);
                    return None;
                }
            }
        }
        Some(opts)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> bool {
        if let Some(old) = self.driver.take() {
            old.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.client = None;

        let opts = match self.build_options() {
            Some(opts) => opts,
            None => return false,
        };
        let (client, mut eventloop) = AsyncClient::new(opts, 32);

        // Wait bounded for the broker to acknowledge the session.
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.cfg.connect_timeout_secs);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                debug!("broker connect timed out");
                return false;
            }
            match tokio::time::timeout(remaining, eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    debug!("broker connect failed: {}", e);
                    return false;
                }
                Err(_) => {
                    debug!("broker connect timed out");
                    return false;
                }
            }
        }

        info!("connected to broker {}:{}", self.cfg.host, self.cfg.port);
        self.connected.store(true, Ordering::SeqCst);

        let connected = self.connected.clone();
        self.driver = Some(tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        warn!("broker session lost: {}", e);
                        connected.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }));
        self.client = Some(client);

        // Retained online announcement, mirrored by the Last Will.
        let topic = self.cfg.topic_status.clone();
        let online = self.online_payload();
        let _ = self.publish(&topic, &online, true).await;
        true
    }

    async fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        if !self.is_connected() {
            return false;
        }
        let client = match &self.client {
            Some(client) => client,
            None => return false,
        };
        match client
            .publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                debug!("publish to {} failed: {}", topic, e);
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
