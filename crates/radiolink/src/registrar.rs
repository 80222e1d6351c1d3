//! Link registrar
//!
//! Holds at most one live link per peer device and decides what happens when
//! a second link for the same device shows up: the newcomer wins, the old
//! link is torn down, and the observer sees `established(new)` before
//! `lost(old)`.
//!
//! Teardown is keyed by link instance, not by device id. When a replaced
//! link later reports that its input ended, it no longer matches the entry
//! in the map, so its replacement is left alone.
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::Mutex` because the critical sections never `.await`.
//! Observer callbacks run while the lock is held so that notifications for
//! one device are strictly ordered; observers must not call back into the
//! registrar.

use crate::core::LinkObserver;
use crate::error::{LinkError, LinkResult};
use crate::handshake::LinkDirectory;
use crate::link::Link;
use crate::types::Packet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Registry of live links keyed by peer device id
pub struct LinkRegistrar {
    links: Mutex<HashMap<String, Arc<Link>>>,
    observer: Arc<dyn LinkObserver>,
}

impl LinkRegistrar {
    /// Create an empty registrar reporting to `observer`
    pub fn new(observer: Arc<dyn LinkObserver>) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            observer,
        }
    }

    /// Make `link` the live link for its device.
    ///
    /// Any previous link for the same device is closed and reported lost
    /// after the new one is established and listening. Admitting a link that
    /// is already the live one is a logic error and leaves everything as is.
    pub fn admit(self: &Arc<Self>, link: Arc<Link>) -> LinkResult<()> {
        let mut links = self.links.lock();
        let device_id = link.device_id().to_owned();

        if links
            .get(&device_id)
            .is_some_and(|current| Arc::ptr_eq(current, &link))
        {
            error!(
                device_id = %device_id,
                link_id = link.id(),
                "link admitted twice"
            );
            return Err(LinkError::DuplicateAdmission {
                device_id,
                link_id: link.id(),
            });
        }

        let previous = links.insert(device_id.clone(), Arc::clone(&link));
        info!(
            device_id = %device_id,
            peer = %link.peer(),
            link_id = link.id(),
            "link established"
        );
        self.observer.on_link_established(&link);
        link.start_listening(Arc::clone(self));

        if let Some(previous) = previous {
            info!(
                device_id = %device_id,
                old_link_id = previous.id(),
                new_link_id = link.id(),
                "replacing existing link"
            );
            self.teardown(&previous);
        }
        Ok(())
    }

    /// Close `link` and forget it if it is still the live link for its
    /// device. Safe to call any number of times; the observer hears about
    /// the loss once.
    pub fn disconnect(&self, link: &Arc<Link>) {
        let mut links = self.links.lock();
        if links
            .get(link.device_id())
            .is_some_and(|current| Arc::ptr_eq(current, link))
        {
            links.remove(link.device_id());
        }
        self.teardown(link);
    }

    /// Live link for `device_id`, if any
    pub fn get(&self, device_id: &str) -> Option<Arc<Link>> {
        self.links.lock().get(device_id).cloned()
    }

    /// Device ids that currently have a live link
    pub fn linked_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.links.lock().keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Number of live links
    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    /// Whether there are no live links
    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }

    pub(crate) fn deliver(&self, link: &Arc<Link>, packet: Packet) {
        self.observer.on_packet_received(link, packet);
    }

    fn teardown(&self, link: &Arc<Link>) {
        if link.close() {
            info!(
                device_id = %link.device_id(),
                peer = %link.peer(),
                link_id = link.id(),
                "link lost"
            );
            self.observer.on_link_lost(link);
        }
    }
}

impl LinkDirectory for LinkRegistrar {
    fn is_linked(&self, device_id: &str) -> bool {
        self.links.lock().contains_key(device_id)
    }
}

impl fmt::Debug for LinkRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkRegistrar")
            .field("links", &self.linked_devices())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MultiplexedChannel, RawConnection, StreamMultiplexer, SplitMultiplexer};
    use crate::handshake::Handshake;
    use crate::registry::SocketRegistry;
    use crate::types::{Certificate, DeviceType, LocalIdentity, PeerAddress, PeerIdentity};
    use assert_matches::assert_matches;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Established(u64),
        Lost(u64),
        Packet(u64, String),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl LinkObserver for Recorder {
        fn on_link_established(&self, link: &Arc<Link>) {
            self.events.lock().push(Event::Established(link.id()));
        }

        fn on_link_lost(&self, link: &Arc<Link>) {
            self.events.lock().push(Event::Lost(link.id()));
        }

        fn on_packet_received(&self, link: &Arc<Link>, packet: Packet) {
            self.events
                .lock()
                .push(Event::Packet(link.id(), packet.packet_type.clone()));
        }
    }

    /// Build a link for `device_id` whose far end is returned for the test
    /// to drive.
    fn link_for(
        device_id: &str,
        address: &str,
        sockets: &Arc<SocketRegistry>,
    ) -> (Arc<Link>, Box<dyn crate::core::RawStream>) {
        let (near, far) = tokio::io::duplex(4096);
        let peer = PeerAddress::from(address);
        let channel: MultiplexedChannel = SplitMultiplexer
            .multiplex(RawConnection::new(peer.clone(), near))
            .unwrap();
        let remote = LocalIdentity::new(device_id, "remote", DeviceType::Phone, vec![1, 2, 3]);
        let payload = remote.to_identity_packet();
        let identity =
            PeerIdentity::from_identity_packet(&payload, Certificate::from_der(vec![1, 2, 3]))
                .unwrap();
        let reservation = sockets.try_reserve(&peer);
        let link = Link::from_handshake(
            Handshake {
                identity,
                payload,
                channel,
            },
            reservation,
        );
        (link, Box::new(far))
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_admit_notifies_and_delivers_identity_first() {
        let recorder = Arc::new(Recorder::default());
        let registrar = Arc::new(LinkRegistrar::new(recorder.clone()));
        let sockets = Arc::new(SocketRegistry::new());

        let (link, mut far) = link_for("dev-1", "aa", &sockets);
        registrar.admit(link.clone()).unwrap();
        assert!(registrar.is_linked("dev-1"));
        assert_eq!(registrar.linked_devices(), vec!["dev-1".to_string()]);

        far.write_all(b"{\"id\":1,\"type\":\"ping\",\"body\":{}}\n")
            .await
            .unwrap();
        far.flush().await.unwrap();

        let id = link.id();
        while recorder.events().len() < 3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            recorder.events(),
            vec![
                Event::Established(id),
                Event::Packet(id, crate::types::PACKET_TYPE_IDENTITY.to_string()),
                Event::Packet(id, "ping".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_replacement_orders_established_before_lost() {
        let recorder = Arc::new(Recorder::default());
        let registrar = Arc::new(LinkRegistrar::new(recorder.clone()));
        let sockets = Arc::new(SocketRegistry::new());

        let (old, _old_far) = link_for("dev-1", "aa", &sockets);
        let (new, _new_far) = link_for("dev-1", "bb", &sockets);
        registrar.admit(old.clone()).unwrap();
        registrar.admit(new.clone()).unwrap();

        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert!(Arc::ptr_eq(&registrar.get("dev-1").unwrap(), &new));
        // the replaced link gave its address back
        assert!(!sockets.is_reserved(old.peer()));
        assert!(sockets.is_reserved(new.peer()));

        let lifecycle: Vec<Event> = recorder
            .events()
            .into_iter()
            .filter(|e| !matches!(e, Event::Packet(..)))
            .collect();
        assert_eq!(
            lifecycle,
            vec![
                Event::Established(old.id()),
                Event::Established(new.id()),
                Event::Lost(old.id()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_close_leaves_replacement_alone() {
        let recorder = Arc::new(Recorder::default());
        let registrar = Arc::new(LinkRegistrar::new(recorder.clone()));
        let sockets = Arc::new(SocketRegistry::new());

        let (old, old_far) = link_for("dev-1", "aa", &sockets);
        let (new, _new_far) = link_for("dev-1", "bb", &sockets);
        registrar.admit(old.clone()).unwrap();
        registrar.admit(new.clone()).unwrap();

        // the old link's input ends after it was replaced
        drop(old_far);
        registrar.disconnect(&old);
        settle().await;

        assert!(Arc::ptr_eq(&registrar.get("dev-1").unwrap(), &new));
        let lost: Vec<Event> = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Lost(_)))
            .collect();
        assert_eq!(lost, vec![Event::Lost(old.id())]);
    }

    #[tokio::test]
    async fn test_double_admission_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let registrar = Arc::new(LinkRegistrar::new(recorder.clone()));
        let sockets = Arc::new(SocketRegistry::new());

        let (link, _far) = link_for("dev-1", "aa", &sockets);
        registrar.admit(link.clone()).unwrap();
        assert_matches!(
            registrar.admit(link.clone()),
            Err(LinkError::DuplicateAdmission { ref device_id, .. }) if device_id == "dev-1"
        );
        assert!(!link.is_closed());
        assert_eq!(registrar.len(), 1);
        assert!(!recorder.events().contains(&Event::Lost(link.id())));
    }

    #[tokio::test]
    async fn test_peer_hangup_reports_loss_once() {
        let recorder = Arc::new(Recorder::default());
        let registrar = Arc::new(LinkRegistrar::new(recorder.clone()));
        let sockets = Arc::new(SocketRegistry::new());

        let (link, far) = link_for("dev-1", "aa", &sockets);
        registrar.admit(link.clone()).unwrap();
        drop(far);

        while registrar.is_linked("dev-1") {
            tokio::task::yield_now().await;
        }
        registrar.disconnect(&link);
        settle().await;

        assert!(registrar.is_empty());
        assert!(sockets.is_empty());
        let lost = recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Lost(_)))
            .count();
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn test_send_packet_reaches_peer() {
        let recorder = Arc::new(Recorder::default());
        let registrar = Arc::new(LinkRegistrar::new(recorder));
        let sockets = Arc::new(SocketRegistry::new());

        let (link, far) = link_for("dev-1", "aa", &sockets);
        registrar.admit(link.clone()).unwrap();

        link.send_packet(&Packet::new("ping").with("n", 1))
            .await
            .unwrap();
        let mut far = BufReader::new(far);
        let mut line = String::new();
        far.read_line(&mut line).await.unwrap();
        let packet = Packet::from_frame(line.as_bytes()).unwrap();
        assert!(packet.is_type("ping"));
        assert_eq!(packet.get_i64("n"), Some(1));

        registrar.disconnect(&link);
        assert_matches!(
            link.send_packet(&Packet::new("ping")).await,
            Err(LinkError::Transport { .. })
        );
    }
}
