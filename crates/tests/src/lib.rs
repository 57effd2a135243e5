//! # Integration Tests
//!
//! End-to-end tests over real loopback sockets.
//!
//! - Config round trips
//! - Clock sync against a responder with a known offset
//! - A full coordinator session driven by a scripted device

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::CoordinatorConfig;

    #[test]
    fn test_default_config_round_trips() {
        let config = CoordinatorConfig::default();
        let toml = ConfigLoader::to_toml(&config).unwrap();
        let parsed = ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap();
        assert_eq!(parsed, config);

        let json = ConfigLoader::to_json(&config).unwrap();
        let parsed = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(parsed, config);
    }
}

#[cfg(test)]
mod clock_sync_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use approx::assert_abs_diff_eq;
    use clock_sync::{
        ClockResponder, ClockSynchronizer, OffsetClock, SyncMethod, SynchronizerSettings,
        UdpClockPeer,
    };
    use std::net::SocketAddr;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    const OFFSET_MS: f64 = 250.0;

    async fn spawn_responder(
        offset_ms: f64,
    ) -> (SocketAddr, CancellationToken, JoinHandle<()>) {
        let responder = ClockResponder::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(OffsetClock::from_millis(offset_ms)),
        )
        .await
        .unwrap();
        let addr = responder.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { responder.run(token).await.unwrap() });
        (addr, cancel, handle)
    }

    #[tokio::test]
    async fn test_offset_converges_to_known_value() {
        let (addr, stop, handle) = spawn_responder(OFFSET_MS).await;
        let sync = ClockSynchronizer::new(
            UdpClockPeer::new("devA", addr, Duration::from_secs(1)),
            SynchronizerSettings::default(),
        );

        for _ in 0..20 {
            sync.measure().await.unwrap();
        }

        let stats = sync.latest_statistics().unwrap();
        assert_eq!(stats.sample_count, 20);
        assert_abs_diff_eq!(stats.median_offset_ms, OFFSET_MS, epsilon = 5.0);
        assert!(stats.quality.is_acceptable());
        assert!(sync.is_synchronized());
        assert_eq!(sync.failure_count(), 0);

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_burst_keeps_single_measurement() {
        let (addr, stop, handle) = spawn_responder(-40.0).await;
        let settings = SynchronizerSettings {
            burst_samples: 4,
            burst_spacing: Duration::from_millis(5),
            ..Default::default()
        };
        let sync = ClockSynchronizer::new(
            UdpClockPeer::new("devB", addr, Duration::from_secs(1)),
            settings,
        );

        let measurement = sync.measure_with(SyncMethod::Burst).await.unwrap();
        assert_eq!(measurement.method, SyncMethod::Burst);
        assert_abs_diff_eq!(measurement.offset_ms, -40.0, epsilon = 5.0);
        assert_eq!(sync.snapshot().history_len, 1);

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_peer_counts_failure() {
        // bound but never answered
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sync = ClockSynchronizer::new(
            UdpClockPeer::new(
                "devC",
                silent.local_addr().unwrap(),
                Duration::from_millis(50),
            ),
            SynchronizerSettings::default(),
        );

        assert!(sync.measure().await.is_err());
        assert_eq!(sync.failure_count(), 1);
        assert!(sync.latest_statistics().is_none());
    }
}

#[cfg(test)]
mod coordinator_tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use contracts::{
        CalibrationPhase, CoordinatorConfig, DeviceStatus, ImageSubmission, PatternType,
        SyncStatusSource,
    };
    use coordinator::{CoordinatorService, SessionError, SessionParams};
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met");
    }

    fn config(clock_port: u16, require_sync_quality: bool) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.network.bind_addr = "127.0.0.1:0".into();
        config.network.accept_timeout_ms = 50;
        config.network.read_timeout_ms = 5_000;
        config.clock_sync.port = clock_port;
        config.clock_sync.interval_ms = 50;
        config.clock_sync.timeout_ms = 40;
        config.session.require_sync_quality = require_sync_quality;
        config.session.min_stereo_pairs = 2;
        config
    }

    /// Scripted device speaking the line protocol
    struct Device {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Device {
        async fn connect(addr: SocketAddr, device_id: &str) -> Self {
            let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();
            let mut device = Self {
                lines: BufReader::new(read).lines(),
                writer,
            };
            device
                .send(json!({
                    "type": "device_registration",
                    "device_id": device_id,
                    "device_name": "rig",
                    "device_type": "android",
                    "cameras": ["cam0", "cam1"],
                    "capabilities": ["camera_capture"],
                }))
                .await;
            device
        }

        async fn send(&mut self, message: Value) {
            let line = format!("{message}\n");
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn submit(&mut self, camera_id: &str, score: f64) {
            self.send(json!({
                "type": "image_data",
                "session_id": "s1",
                "device_id": "devA",
                "camera_id": camera_id,
                "image_data": ImageSubmission::encode_image(b"frame"),
                "quality_result": { "overall_score": score, "pattern_found": true },
            }))
            .await;
        }

        async fn next_command(&mut self) -> Value {
            let line = timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }
    }

    #[tokio::test]
    async fn test_full_session_over_loopback() {
        let service = CoordinatorService::builder(config(9, false)).build();
        let addr = service.start().await.unwrap();

        let mut device = Device::connect(addr, "devA").await;
        wait_for(|| service.registry().connected_count() == 1).await;

        let sessions = service.sessions();
        sessions
            .create_session("s1", SessionParams::new(PatternType::Chessboard, 3, 0.6))
            .unwrap();
        let report = sessions.start_session("s1").unwrap();
        assert_eq!(report.delivered, vec!["devA"]);

        let created = device.next_command().await;
        assert_eq!(created["command_type"], "phase_changed");
        assert_eq!(created["parameters"]["phase"], "initialization");
        let start = device.next_command().await;
        assert_eq!(start["command_type"], "start_calibration");
        assert_eq!(start["parameters"]["target_images"], 3);
        let detecting = device.next_command().await;
        assert_eq!(detecting["parameters"]["phase"], "pattern_detection");

        sessions
            .advance_phase("s1", CalibrationPhase::DataCollection)
            .unwrap();
        assert_eq!(
            device.next_command().await["parameters"]["phase"],
            "data_collection"
        );

        for _ in 0..3 {
            device.submit("cam0", 0.8).await;
            device.submit("cam1", 0.8).await;
        }
        wait_for(|| sessions.phase("s1") == Some(CalibrationPhase::StereoCalibration)).await;
        assert_eq!(
            device.next_command().await["parameters"]["phase"],
            "stereo_calibration"
        );

        // late low-quality frame is rejected
        device.submit("cam0", 0.4).await;
        wait_for(|| service.dispatcher().pending() == 0).await;
        sleep(Duration::from_millis(50)).await;
        let status = sessions.status("s1").unwrap();
        assert!(status.cameras.iter().all(|camera| camera.collected == 3));
        assert_eq!(status.overall_progress, 1.0);

        drop(device);
        wait_for(|| service.registry().connected_count() == 0).await;
        assert_eq!(
            service.registry().get("devA").unwrap().status,
            DeviceStatus::Disconnected
        );
        assert_eq!(sessions.phase("s1"), Some(CalibrationPhase::StereoCalibration));
        assert_eq!(sessions.status("s1").unwrap().cameras[0].collected, 3);

        service.stop().await;
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_sync_gate_opens_once_device_clock_is_measured() {
        let responder = clock_sync::ClockResponder::bind(
            "127.0.0.1:0".parse().unwrap(),
            std::sync::Arc::new(clock_sync::SystemClock),
        )
        .await
        .unwrap();
        let clock_port = responder.local_addr().unwrap().port();
        let cancel = tokio_util::sync::CancellationToken::new();
        let responder_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { responder.run(cancel).await })
        };

        let service = CoordinatorService::builder(config(clock_port, true)).build();
        let addr = service.start().await.unwrap();
        let _device = Device::connect(addr, "devA").await;
        wait_for(|| service.registry().connected_count() == 1).await;

        let sessions = service.sessions();
        sessions
            .create_session("s1", SessionParams::new(PatternType::Chessboard, 3, 0.6))
            .unwrap();

        let scheduler = service.scheduler();
        wait_for(|| {
            scheduler
                .sync_statistics("devA")
                .is_some_and(|stats| stats.quality.is_acceptable())
        })
        .await;

        sessions.start_session("s1").unwrap();
        assert_eq!(sessions.phase("s1"), Some(CalibrationPhase::PatternDetection));
        sessions
            .advance_phase("s1", CalibrationPhase::DataCollection)
            .unwrap();

        let skipped = sessions.advance_phase("s1", CalibrationPhase::StereoCalibration);
        assert!(matches!(skipped, Err(SessionError::PhaseOrder { .. })));

        service.stop().await;
        cancel.cancel();
        responder_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unmeasured_device_blocks_session_start() {
        // nothing answers on the clock port
        let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let clock_port = silent.local_addr().unwrap().port();

        let service = CoordinatorService::builder(config(clock_port, true)).build();
        let addr = service.start().await.unwrap();
        let _device = Device::connect(addr, "devA").await;
        wait_for(|| service.registry().connected_count() == 1).await;

        let sessions = service.sessions();
        sessions
            .create_session("s1", SessionParams::new(PatternType::Chessboard, 3, 0.6))
            .unwrap();
        let result = sessions.start_session("s1");
        assert!(matches!(result, Err(SessionError::SyncUnavailable { .. })));
        assert_eq!(sessions.phase("s1"), Some(CalibrationPhase::Initialization));

        service.stop().await;
    }
}
