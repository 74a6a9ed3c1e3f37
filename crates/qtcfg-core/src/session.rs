//! Handshake session - orchestrates the mode switch and PING exchange.
//!
//! The run is a single linear pass:
//!
//! ```text
//! Discover -> ModeSwitch -> Reconnect -> Rediscover -> Configure
//!          -> ClaimInterface -> SendPing -> ReceivePing -> VerifyEcho -> Teardown
//! ```
//!
//! Resources are held in scoped guards, so every early return releases the
//! claim and closes the handle, in that order.

use std::cell::Cell;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::HandshakeConfig;
use crate::error::HandshakeError;
use crate::events::{
    EnumerationPhase, HandshakeEvent, HandshakeObserver, PacketDirection, Stage, TracingObserver,
};
use crate::protocol::PingPacket;
use crate::transport::{ClaimedInterface, OpenDevice, TransportError, UsbTransport};

/// Result of a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Open attempts needed to find the device after the mode switch.
    pub reconnect_attempts: u32,
}

/// Handshake session - runs the mode switch and PING handshake against one
/// device.
pub struct HandshakeSession<T: UsbTransport, C: Clock, O: HandshakeObserver> {
    transport: T,
    config: HandshakeConfig,
    clock: C,
    observer: Arc<O>,
    stage: Cell<Stage>,
}

impl<T: UsbTransport> HandshakeSession<T, SystemClock, TracingObserver> {
    /// Create a new session with the wall clock and tracing observer.
    pub fn new(transport: T, config: HandshakeConfig) -> Self {
        Self::with_parts(transport, config, SystemClock, Arc::new(TracingObserver))
    }
}

impl<T: UsbTransport, C: Clock, O: HandshakeObserver> HandshakeSession<T, C, O> {
    pub fn with_parts(transport: T, config: HandshakeConfig, clock: C, observer: Arc<O>) -> Self {
        Self {
            transport,
            config,
            clock,
            observer,
            stage: Cell::new(Stage::Discover),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Run the complete handshake. Every call starts from `Discover`; no
    /// retry happens here beyond the bounded reconnect poll. The
    /// configuration is validated before the device is touched.
    #[instrument(skip(self), fields(device = %self.config.identity))]
    pub fn run(&self) -> Result<HandshakeOutcome, HandshakeError> {
        self.stage.set(Stage::Discover);
        let result = self.run_stages();
        match &result {
            Ok(_) => self.emit(HandshakeEvent::Complete),
            Err(e) => self.emit(HandshakeEvent::Failed {
                stage: e.stage(),
                message: e.to_string(),
            }),
        }
        result
    }

    fn run_stages(&self) -> Result<HandshakeOutcome, HandshakeError> {
        self.config.validate()?;
        let identity = self.config.identity;
        let timeouts = &self.config.timeouts;

        // Discover
        let device = OpenDevice::open(&self.transport, identity)
            .map_err(|source| HandshakeError::DeviceNotFound { identity, source })?;
        self.emit(HandshakeEvent::DeviceOpened {
            identity,
            phase: EnumerationPhase::PreSwitch,
        });

        // ModeSwitch
        self.goto(Stage::ModeSwitch);
        device
            .control_transfer(&self.config.mode_switch, timeouts.transfer())
            .map_err(|source| HandshakeError::ModeSwitchFailed { source })?;
        info!(request = %self.config.mode_switch, "Mode switch sent, device will re-enumerate");

        // Reconnect: the old handle is stale from here on.
        self.goto(Stage::Reconnect);
        device.close();
        self.clock.sleep(timeouts.settle());

        // Rediscover
        self.goto(Stage::Rediscover);
        let (device, reconnect_attempts) = self.rediscover()?;
        self.emit(HandshakeEvent::DeviceOpened {
            identity,
            phase: EnumerationPhase::PostSwitch,
        });

        // Configure
        self.goto(Stage::Configure);
        let configuration = self.config.target_configuration;
        device
            .set_configuration(configuration)
            .map_err(|source| HandshakeError::ConfigurationFailed {
                configuration,
                source,
            })?;

        // ClaimInterface
        self.goto(Stage::ClaimInterface);
        let interface = self.config.interface;
        let claim = device
            .claim_interface(interface)
            .map_err(|source| HandshakeError::InterfaceClaimFailed { interface, source })?;

        self.ping(&claim)?;

        self.goto(Stage::Teardown);
        claim.release();
        device.close();

        self.goto(Stage::Complete);
        info!(reconnect_attempts, "PING handshake successful");
        Ok(HandshakeOutcome { reconnect_attempts })
    }

    /// Poll for the re-enumerated device until the reconnect budget runs out.
    /// Only "not found" is retried; any other open failure ends the run.
    fn rediscover(&self) -> Result<(OpenDevice<'_, T>, u32), HandshakeError> {
        let identity = self.config.identity;
        let timeouts = &self.config.timeouts;
        let deadline = self.clock.now() + timeouts.reconnect();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.emit(HandshakeEvent::ReconnectPoll { attempt: attempts });

            match OpenDevice::open(&self.transport, identity) {
                Ok(device) => {
                    info!(attempts, "Device re-enumerated");
                    return Ok((device, attempts));
                }
                Err(source) if source.is_not_found() => {
                    let now = self.clock.now();
                    if now >= deadline {
                        warn!(attempts, "Device did not come back after mode switch");
                        return Err(HandshakeError::DeviceNotFoundAfterSwitch {
                            identity,
                            attempts,
                            source,
                        });
                    }
                    self.clock
                        .sleep(timeouts.poll_interval().min(deadline - now));
                }
                Err(source) => {
                    return Err(HandshakeError::DeviceNotFoundAfterSwitch {
                        identity,
                        attempts,
                        source,
                    });
                }
            }
        }
    }

    fn ping(&self, claim: &ClaimedInterface<'_, '_, T>) -> Result<(), HandshakeError> {
        let timeout = self.config.timeouts.transfer();
        let out_endpoint = self.config.out_endpoint;
        let in_endpoint = self.config.in_endpoint;
        let packet = self.config.ping.to_bytes();

        // SendPing
        self.goto(Stage::SendPing);
        let written = claim
            .bulk_write(out_endpoint, &packet, timeout)
            .map_err(|source| HandshakeError::PingSendFailed {
                endpoint: out_endpoint,
                source,
            })?;
        if written != packet.len() {
            return Err(HandshakeError::PingSendFailed {
                endpoint: out_endpoint,
                source: TransportError::ShortTransfer {
                    expected: packet.len(),
                    actual: written,
                },
            });
        }
        self.packet(PacketDirection::Tx, &packet);

        // ReceivePing
        self.goto(Stage::ReceivePing);
        let mut received = [0u8; PingPacket::SIZE];
        let read = claim
            .bulk_read(in_endpoint, &mut received, timeout)
            .map_err(|source| HandshakeError::PingReceiveFailed {
                endpoint: in_endpoint,
                source,
            })?;
        self.packet(PacketDirection::Rx, &received[..read]);
        if read != received.len() {
            return Err(HandshakeError::PingReceiveFailed {
                endpoint: in_endpoint,
                source: TransportError::ShortTransfer {
                    expected: received.len(),
                    actual: read,
                },
            });
        }

        // VerifyEcho
        self.goto(Stage::VerifyEcho);
        if let Some(offset) = packet.iter().zip(&received).position(|(a, b)| a != b) {
            match PingPacket::from_bytes(&received) {
                Ok(reply) => warn!(sent = %self.config.ping, received = %reply, "PING echo differs"),
                Err(e) => warn!(error = %e, "PING echo is not a PING packet"),
            }
            return Err(HandshakeError::PingMismatch {
                offset,
                expected: packet,
                received,
            });
        }
        debug!(ping = %self.config.ping, "PING echoed");
        Ok(())
    }

    fn goto(&self, to: Stage) {
        let from = self.stage.replace(to);
        self.emit(HandshakeEvent::StageChanged { from, to });
    }

    fn packet(&self, direction: PacketDirection, data: &[u8]) {
        self.emit(HandshakeEvent::Packet {
            direction,
            length: data.len(),
            data: data.to_vec(),
        });
    }

    fn emit(&self, event: HandshakeEvent) {
        self.observer.on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::device::DeviceIdentity;
    use crate::events::RecordingObserver;
    use crate::protocol::ModeSwitchRequest;
    use crate::transport::{MockCall, MockTransport};
    use std::time::Duration;

    struct Harness {
        mock: MockTransport,
        clock: MockClock,
        observer: Arc<RecordingObserver>,
        session: HandshakeSession<MockTransport, MockClock, RecordingObserver>,
    }

    fn harness(config: HandshakeConfig) -> Harness {
        let mock = MockTransport::new();
        let clock = MockClock::new();
        let observer = Arc::new(RecordingObserver::new());
        let session =
            HandshakeSession::with_parts(mock.clone(), config, clock.clone(), observer.clone());
        Harness {
            mock,
            clock,
            observer,
            session,
        }
    }

    fn default_harness() -> Harness {
        harness(HandshakeConfig::default())
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::default()
    }

    fn ping_bytes() -> Vec<u8> {
        PingPacket::default().to_bytes().to_vec()
    }

    /// Every handle opened is closed exactly once, every claim granted is
    /// released exactly once before its handle is closed, and nothing else
    /// is closed or released.
    fn assert_resources_balanced(mock: &MockTransport) {
        let calls = mock.calls();
        let opened = mock.opened_handles();
        let claimed = mock.granted_claims();
        let close_at = |handle: u32| {
            let closes: Vec<_> = calls
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == MockCall::Close { handle })
                .map(|(i, _)| i)
                .collect();
            assert_eq!(closes.len(), 1, "handle {handle} closed {} times", closes.len());
            closes[0]
        };

        for &handle in &opened {
            close_at(handle);
        }
        for &handle in &claimed {
            let releases: Vec<_> = calls
                .iter()
                .enumerate()
                .filter(|(_, c)| matches!(c, MockCall::ReleaseInterface { handle: h, .. } if *h == handle))
                .map(|(i, _)| i)
                .collect();
            assert_eq!(releases.len(), 1, "claim on {handle} released {} times", releases.len());
            assert!(releases[0] < close_at(handle), "claim on {handle} outlived its handle");
        }
        for call in &calls {
            match call {
                MockCall::Close { handle } => assert!(opened.contains(handle)),
                MockCall::ReleaseInterface { handle, .. } => assert!(claimed.contains(handle)),
                _ => {}
            }
        }
    }

    #[test]
    fn test_success_call_sequence() {
        let h = default_harness();
        let outcome = h.session.run().unwrap();
        assert_eq!(outcome.reconnect_attempts, 1);

        assert_eq!(
            h.mock.calls(),
            vec![
                MockCall::Open {
                    identity: identity()
                },
                MockCall::ControlTransfer {
                    handle: 1,
                    request: ModeSwitchRequest::default()
                },
                MockCall::Close { handle: 1 },
                MockCall::Open {
                    identity: identity()
                },
                MockCall::SetConfiguration {
                    handle: 2,
                    configuration: 2
                },
                MockCall::ClaimInterface {
                    handle: 2,
                    interface: 0
                },
                MockCall::BulkWrite {
                    handle: 2,
                    endpoint: 0x02,
                    data: ping_bytes()
                },
                MockCall::BulkRead {
                    handle: 2,
                    endpoint: 0x81,
                    len: 16
                },
                MockCall::ReleaseInterface {
                    handle: 2,
                    interface: 0
                },
                MockCall::Close { handle: 2 },
            ]
        );
        assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn test_success_stage_events() {
        let h = default_harness();
        h.session.run().unwrap();

        assert_eq!(
            h.observer.stages(),
            vec![
                Stage::ModeSwitch,
                Stage::Reconnect,
                Stage::Rediscover,
                Stage::Configure,
                Stage::ClaimInterface,
                Stage::SendPing,
                Stage::ReceivePing,
                Stage::VerifyEcho,
                Stage::Teardown,
                Stage::Complete,
            ]
        );
        let events = h.observer.events();
        assert!(events.contains(&HandshakeEvent::DeviceOpened {
            identity: identity(),
            phase: EnumerationPhase::PostSwitch
        }));
        assert_eq!(events.last(), Some(&HandshakeEvent::Complete));

        let packets: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, HandshakeEvent::Packet { .. }))
            .cloned()
            .collect();
        assert_eq!(
            packets,
            vec![
                HandshakeEvent::Packet {
                    direction: PacketDirection::Tx,
                    length: 16,
                    data: ping_bytes()
                },
                HandshakeEvent::Packet {
                    direction: PacketDirection::Rx,
                    length: 16,
                    data: ping_bytes()
                },
            ]
        );
    }

    #[test]
    fn test_invalid_config_rejected_before_usb() {
        let mut config = HandshakeConfig::default();
        config.timeouts.poll_interval_ms = 0;
        let h = harness(config);
        h.mock.queue_present();
        h.mock.device_absent();

        let err = h.session.run().unwrap_err();
        assert_eq!(
            err,
            HandshakeError::InvalidConfig(crate::config::ConfigError::ZeroTimeout(
                "poll interval"
            ))
        );
        assert!(h.mock.calls().is_empty());
        assert!(h.clock.sleeps().is_empty());
        assert_eq!(
            h.observer.events(),
            vec![HandshakeEvent::Failed {
                stage: Stage::Discover,
                message: err.to_string()
            }]
        );
    }

    #[test]
    fn test_session_reruns_from_discover() {
        let h = default_harness();
        h.session.run().unwrap();
        h.session.transport().clear_calls();

        h.session.run().unwrap();
        let calls = h.mock.calls();
        assert_eq!(calls.len(), 10);
        assert_eq!(
            calls[0],
            MockCall::Open {
                identity: identity()
            }
        );
        // Fresh handles on the second run
        assert_eq!(calls[2], MockCall::Close { handle: 3 });
        assert_eq!(calls[9], MockCall::Close { handle: 4 });
        assert_resources_balanced(&h.mock);
    }

    #[test]
    fn test_device_absent_makes_one_call() {
        let h = default_harness();
        h.mock.device_absent();

        let err = h.session.run().unwrap_err();
        assert!(matches!(err, HandshakeError::DeviceNotFound { .. }));
        assert_eq!(
            h.mock.calls(),
            vec![MockCall::Open {
                identity: identity()
            }]
        );
        assert!(h.clock.sleeps().is_empty());
        assert_eq!(
            h.observer.events().last(),
            Some(&HandshakeEvent::Failed {
                stage: Stage::Discover,
                message: err.to_string()
            })
        );
    }

    #[test]
    fn test_mode_switch_failure_closes_handle() {
        let h = default_harness();
        h.mock
            .fail_control(TransportError::ControlTransferFailed("stall".into()));

        let err = h.session.run().unwrap_err();
        assert!(matches!(err, HandshakeError::ModeSwitchFailed { .. }));
        let calls = h.mock.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], MockCall::Close { handle: 1 });
        assert!(h.clock.sleeps().is_empty());
    }

    #[test]
    fn test_stale_handle_not_used_after_switch() {
        let h = default_harness();
        h.session.run().unwrap();

        let calls = h.mock.calls();
        let switch = calls
            .iter()
            .position(|c| matches!(c, MockCall::ControlTransfer { .. }))
            .unwrap();
        let stale_uses: Vec<_> = calls[switch + 1..]
            .iter()
            .filter(|c| c.handle() == Some(1))
            .collect();
        assert_eq!(stale_uses, vec![&MockCall::Close { handle: 1 }]);
        // The close of the stale handle precedes the second discovery
        let reopen = calls
            .iter()
            .rposition(|c| matches!(c, MockCall::Open { .. }))
            .unwrap();
        assert!(calls[..reopen].contains(&MockCall::Close { handle: 1 }));
    }

    #[test]
    fn test_reconnect_polls_until_device_returns() {
        let h = default_harness();
        h.mock.queue_present();
        h.mock.queue_absent(3);

        let outcome = h.session.run().unwrap();
        assert_eq!(outcome.reconnect_attempts, 4);
        assert_eq!(
            h.clock.sleeps(),
            vec![
                Duration::from_millis(500),
                Duration::from_millis(100),
                Duration::from_millis(100),
                Duration::from_millis(100),
            ]
        );
        assert_resources_balanced(&h.mock);
    }

    #[test]
    fn test_reconnect_gives_up_at_deadline() {
        let h = default_harness();
        h.mock.queue_present();
        h.mock.device_absent();

        let err = h.session.run().unwrap_err();
        match err {
            HandshakeError::DeviceNotFoundAfterSwitch {
                attempts, source, ..
            } => {
                assert_eq!(attempts, 51);
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.clock.elapsed(), Duration::from_millis(500 + 5000));
        assert_eq!(h.mock.close_count(), 1);
    }

    #[test]
    fn test_zero_reconnect_budget_is_single_attempt() {
        let mut config = HandshakeConfig::default();
        config.timeouts.reconnect_ms = 0;
        let h = harness(config);
        h.mock.queue_present();
        h.mock.device_absent();

        let err = h.session.run().unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::DeviceNotFoundAfterSwitch { attempts: 1, .. }
        ));
        assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn test_reconnect_open_error_is_not_retried() {
        let h = default_harness();
        h.mock.queue_present();
        h.mock.queue_absent(1);
        h.mock
            .queue_open_error(TransportError::OpenFailed("permission denied".into()));

        let err = h.session.run().unwrap_err();
        assert_eq!(
            err,
            HandshakeError::DeviceNotFoundAfterSwitch {
                identity: identity(),
                attempts: 2,
                source: TransportError::OpenFailed("permission denied".into()),
            }
        );
        let opens = h
            .mock
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Open { .. }))
            .count();
        assert_eq!(opens, 3);
    }

    #[test]
    fn test_configuration_failure_closes_new_handle() {
        let h = default_harness();
        h.mock.fail_set_configuration(TransportError::ConfigurationFailed {
            configuration: 2,
            message: "busy".into(),
        });

        let err = h.session.run().unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::ConfigurationFailed {
                configuration: 2,
                ..
            }
        ));
        let calls = h.mock.calls();
        assert_eq!(calls.last(), Some(&MockCall::Close { handle: 2 }));
        assert_eq!(h.mock.release_count(), 0);
        assert_resources_balanced(&h.mock);
    }

    #[test]
    fn test_claim_failure_closes_without_release() {
        let h = default_harness();
        h.mock.fail_claim(TransportError::ClaimInterfaceFailed {
            interface: 0,
            message: "busy".into(),
        });

        let err = h.session.run().unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::InterfaceClaimFailed { interface: 0, .. }
        ));
        assert_eq!(h.mock.release_count(), 0);
        assert_eq!(h.mock.calls().last(), Some(&MockCall::Close { handle: 2 }));
    }

    #[test]
    fn test_send_error_releases_then_closes() {
        let h = default_harness();
        h.mock
            .set_write_result(Err(TransportError::Timeout { timeout_ms: 1000 }));

        let err = h.session.run().unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::PingSendFailed {
                endpoint: 0x02,
                source: TransportError::Timeout { .. }
            }
        ));
        let calls = h.mock.calls();
        let n = calls.len();
        assert_eq!(
            &calls[n - 2..],
            &[
                MockCall::ReleaseInterface {
                    handle: 2,
                    interface: 0
                },
                MockCall::Close { handle: 2 },
            ]
        );
        assert!(!calls.iter().any(|c| matches!(c, MockCall::BulkRead { .. })));
    }

    #[test]
    fn test_short_write_is_send_failure() {
        let h = default_harness();
        h.mock.set_write_result(Ok(10));

        let err = h.session.run().unwrap_err();
        assert_eq!(
            err,
            HandshakeError::PingSendFailed {
                endpoint: 0x02,
                source: TransportError::ShortTransfer {
                    expected: 16,
                    actual: 10
                },
            }
        );
        assert_resources_balanced(&h.mock);
    }

    #[test]
    fn test_read_timeout_is_receive_failure() {
        let h = default_harness();
        h.mock.fail_read(TransportError::Timeout { timeout_ms: 1000 });

        let err = h.session.run().unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::PingReceiveFailed { endpoint: 0x81, .. }
        ));
        assert_eq!(h.mock.release_count(), 1);
        assert_eq!(h.mock.close_count(), 2);
    }

    #[test]
    fn test_short_read_is_receive_failure_not_mismatch() {
        let h = default_harness();
        h.mock.respond_with(&ping_bytes()[..12]);

        let err = h.session.run().unwrap_err();
        assert_eq!(
            err,
            HandshakeError::PingReceiveFailed {
                endpoint: 0x81,
                source: TransportError::ShortTransfer {
                    expected: 16,
                    actual: 12
                },
            }
        );
        let rx: Vec<_> = h
            .observer
            .events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    HandshakeEvent::Packet {
                        direction: PacketDirection::Rx,
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(
            rx,
            vec![HandshakeEvent::Packet {
                direction: PacketDirection::Rx,
                length: 12,
                data: ping_bytes()[..12].to_vec()
            }]
        );
        assert_resources_balanced(&h.mock);
    }

    #[test]
    fn test_mismatch_at_byte_12() {
        let h = default_harness();
        let mut reply = ping_bytes();
        reply[12] ^= 0xFF;
        h.mock.respond_with(&reply);

        let err = h.session.run().unwrap_err();
        match &err {
            HandshakeError::PingMismatch {
                offset,
                expected,
                received,
            } => {
                assert_eq!(*offset, 12);
                assert_eq!(expected.to_vec(), ping_bytes());
                assert_eq!(received.to_vec(), reply);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_protocol_error());
        assert_eq!(h.mock.release_count(), 1);
        assert_eq!(h.mock.close_count(), 2);
        assert_resources_balanced(&h.mock);
    }

    #[test]
    fn test_any_single_byte_difference_fails() {
        for offset in 0..PingPacket::SIZE {
            let h = default_harness();
            let mut reply = ping_bytes();
            reply[offset] = reply[offset].wrapping_add(1);
            h.mock.respond_with(&reply);

            match h.session.run() {
                Err(HandshakeError::PingMismatch { offset: at, .. }) => assert_eq!(at, offset),
                other => panic!("byte {offset}: unexpected result {other:?}"),
            }
        }
    }

    #[test]
    fn test_every_failure_point_balances_resources() {
        type Inject = Box<dyn Fn(&MockTransport)>;
        let failures: Vec<(Stage, Inject)> = vec![
            (Stage::Discover, Box::new(|m: &MockTransport| m.device_absent()) as Inject),
            (
                Stage::ModeSwitch,
                Box::new(|m: &MockTransport| m.fail_control(TransportError::Disconnected)) as Inject,
            ),
            (
                Stage::Rediscover,
                Box::new(|m: &MockTransport| {
                    m.queue_present();
                    m.device_absent();
                }) as Inject,
            ),
            (
                Stage::Configure,
                Box::new(|m: &MockTransport| m.fail_set_configuration(TransportError::Disconnected)) as Inject,
            ),
            (
                Stage::ClaimInterface,
                Box::new(|m: &MockTransport| m.fail_claim(TransportError::Disconnected)) as Inject,
            ),
            (
                Stage::SendPing,
                Box::new(|m: &MockTransport| m.set_write_result(Err(TransportError::Disconnected))) as Inject,
            ),
            (
                Stage::ReceivePing,
                Box::new(|m: &MockTransport| m.fail_read(TransportError::Disconnected)) as Inject,
            ),
            (Stage::VerifyEcho, Box::new(|m: &MockTransport| m.respond_with(&[0u8; 16])) as Inject),
        ];

        for (stage, inject) in failures {
            let h = default_harness();
            inject(&h.mock);
            let err = h.session.run().unwrap_err();
            assert_eq!(err.stage(), stage);
            assert_resources_balanced(&h.mock);
        }
    }

    #[test]
    fn test_runs_are_deterministic() {
        let run_once = || {
            let h = default_harness();
            let mut reply = ping_bytes();
            reply[4] = b'X';
            h.mock.respond_with(&reply);
            (h.session.run(), h.mock.calls())
        };
        assert_eq!(run_once(), run_once());
    }

    #[test]
    fn test_custom_config_flows_through() {
        let mut config = HandshakeConfig::default();
        config.identity = DeviceIdentity::new(0x1234, 0x5678);
        config.target_configuration = 5;
        config.interface = 2;
        config.out_endpoint = 0x03;
        config.in_endpoint = 0x84;
        config.ping = PingPacket::new(*b"TEST", 42);
        config.timeouts.settle_ms = 50;
        let h = harness(config.clone());
        assert_eq!(h.session.config(), &config);

        h.session.run().unwrap();
        let calls = h.mock.calls();
        assert_eq!(
            calls[0],
            MockCall::Open {
                identity: config.identity
            }
        );
        assert!(calls.contains(&MockCall::SetConfiguration {
            handle: 2,
            configuration: 5
        }));
        assert!(calls.contains(&MockCall::BulkWrite {
            handle: 2,
            endpoint: 0x03,
            data: config.ping.to_bytes().to_vec()
        }));
        assert!(calls.contains(&MockCall::BulkRead {
            handle: 2,
            endpoint: 0x84,
            len: 16
        }));
        assert_eq!(h.clock.sleeps(), vec![Duration::from_millis(50)]);
    }
}
