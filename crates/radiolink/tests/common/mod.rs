//! Shared fixtures for the radiolink integration tests
#![allow(dead_code)]

use parking_lot::Mutex;
use radiolink::{
    Certificate, DeviceType, IdentityVerifier, Link, LinkObserver, LinkProviderConfig,
    LinkResult, LocalIdentity, MemoryRadio, MemoryRadioAdapter, Packet, RadioLinkProvider,
};
use std::sync::Arc;
use std::time::Duration;

/// Install a test subscriber once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Accepts any certificate bytes
pub struct AcceptAll;

impl IdentityVerifier for AcceptAll {
    fn parse_certificate(&self, der: &[u8]) -> LinkResult<Certificate> {
        Ok(Certificate::from_der(der.to_vec()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Established { device_id: String, link_id: u64 },
    Lost { device_id: String, link_id: u64 },
    Packet { link_id: u64, packet_type: String },
}

/// Records every observer callback in order
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Observed>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }

    pub fn established(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Established { link_id, .. } => Some(link_id),
                _ => None,
            })
            .collect()
    }

    pub fn lost(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Lost { link_id, .. } => Some(link_id),
                _ => None,
            })
            .collect()
    }

    pub fn packets(&self, link_id: u64) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Observed::Packet {
                    link_id: id,
                    packet_type,
                } if id == link_id => Some(packet_type),
                _ => None,
            })
            .collect()
    }
}

impl LinkObserver for Recorder {
    fn on_link_established(&self, link: &Arc<Link>) {
        self.events.lock().push(Observed::Established {
            device_id: link.device_id().to_string(),
            link_id: link.id(),
        });
    }

    fn on_link_lost(&self, link: &Arc<Link>) {
        self.events.lock().push(Observed::Lost {
            device_id: link.device_id().to_string(),
            link_id: link.id(),
        });
    }

    fn on_packet_received(&self, link: &Arc<Link>, packet: Packet) {
        self.events.lock().push(Observed::Packet {
            link_id: link.id(),
            packet_type: packet.packet_type,
        });
    }
}

/// Short timings so scenarios finish quickly
pub fn fast_config() -> LinkProviderConfig {
    LinkProviderConfig {
        settle_delay_ms: 5,
        discovery_window_ms: 1_000,
        handshake_timeout_ms: Some(2_000),
        ..LinkProviderConfig::default()
    }
}

pub struct Device {
    pub adapter: MemoryRadioAdapter,
    pub provider: RadioLinkProvider,
    pub observer: Arc<Recorder>,
}

/// A provider for `device_id` on a new adapter at `address`
pub fn device(
    radio: &MemoryRadio,
    address: &str,
    device_id: &str,
    config: LinkProviderConfig,
) -> Device {
    let adapter = radio.adapter(address);
    let observer = Arc::new(Recorder::default());
    let local = LocalIdentity::new(
        device_id,
        format!("{device_id} test device"),
        DeviceType::Laptop,
        device_id.as_bytes().to_vec(),
    );
    let provider = RadioLinkProvider::new(
        Arc::new(adapter.clone()),
        local,
        Arc::new(AcceptAll),
        observer.clone(),
        config,
    )
    .unwrap();
    Device {
        adapter,
        provider,
        observer,
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
