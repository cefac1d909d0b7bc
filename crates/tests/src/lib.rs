//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 配置 -> Dispatcher -> 合并 -> 回放 全链路
//! - 队列订阅者（tokio）

#[cfg(test)]
mod contract_tests {
    use contracts::{BusConfig, ConfigVersion, DataCode, ValueKind};

    #[test]
    fn test_contracts_compile() {
        let config = BusConfig::default();
        assert_eq!(config.version, ConfigVersion::V1);
        assert_eq!(config.merge_threshold_secs, 12.0);
    }

    #[test]
    fn test_data_code_table_is_frozen() {
        assert_eq!(DataCode::Awa.code(), 1);
        assert_eq!(DataCode::Roll.code(), 23);
        assert_eq!(DataCode::from_short_name("rot"), Some(DataCode::RateOfTurn));
        assert_eq!(DataCode::ValidGps.kind(), ValueKind::BinaryEdge);
        assert_eq!(DataCode::ALL.len(), 23);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bus::{
        count_values, crop_dispatcher, is_valid, list_data_codes_with_differences, merge_all,
        shallow_copy, Dispatcher, ReplayDispatcher,
    };
    use config_loader::ConfigLoader;
    use contracts::{Angle, BusConfig, ClockMode, DataCode, TimeStamp, Velocity};

    fn ts(secs: f64) -> TimeStamp {
        TimeStamp::from_secs(secs)
    }

    fn load_config(content: &str) -> BusConfig {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        ConfigLoader::load_from_path(file.path()).unwrap()
    }

    /// Two wind sensors: a masthead unit at 1 Hz and a backup that only
    /// reports occasionally.
    fn recorded(config: &BusConfig) -> Dispatcher {
        let mut d = Dispatcher::with_config(config);
        for t in [0.0, 1.0, 2.0] {
            d.publish_value(DataCode::Aws, "masthead", ts(t), Velocity::from_knots(10.0 + t))
                .unwrap();
        }
        for t in [0.5, 10.0, 30.0] {
            d.publish_value(DataCode::Aws, "backup", ts(t), Velocity::from_knots(5.0))
                .unwrap();
        }
        d.publish_value(DataCode::Awa, "masthead", ts(1.0), Angle::from_degrees(40.0))
            .unwrap();
        d
    }

    const CONFIG: &str = r#"
        merge_threshold_secs = 5.0

        [priorities]
        masthead = 2
        backup = 1
    "#;

    #[test]
    fn test_config_to_merged_dispatcher() {
        let config = load_config(CONFIG);
        let src = recorded(&config);
        assert_eq!(src.merge_threshold(), Duration::from_secs(5));
        assert_eq!(src.current_source(DataCode::Aws).map(|s| s.as_str()), Some("masthead"));

        let merged = merge_all(&src, "merged", src.merge_threshold());
        let aws = merged.values::<Velocity>(DataCode::Aws, "merged").unwrap();
        let times: Vec<f64> = aws.iter().map(|s| s.time.as_secs()).collect();
        // The backup sample at 0.5 s collides with the masthead and loses.
        assert_eq!(times, vec![0.0, 1.0, 2.0, 10.0, 30.0]);
        assert!(aws.is_monotonic());
        assert_eq!(merged.values::<Angle>(DataCode::Awa, "merged").unwrap().len(), 1);
        assert_eq!(merged.source_priority("masthead"), 2);

        // Merging never touches its inputs.
        assert_eq!(src.dispatch_data_for_source(DataCode::Aws, "backup").unwrap().len(), 3);
        assert!(is_valid(&merged));
    }

    #[test]
    fn test_derived_dispatchers_share_channels() {
        let config = load_config(CONFIG);
        let mut src = recorded(&config);
        let copy = shallow_copy(&src);
        let cropped = crop_dispatcher(&src, Some(ts(1.0)), Some(ts(10.0)));

        src.publish_value(DataCode::Aws, "masthead", ts(3.0), Velocity::from_knots(13.0))
            .unwrap();
        assert_eq!(count_values(&copy), 8);
        assert_eq!(count_values(&cropped), 4);
        assert!(list_data_codes_with_differences(src.all_sources(), copy.all_sources()).is_empty());
    }

    fn replay_times(src: &Dispatcher, config: &BusConfig) -> Vec<(String, f64)> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut replay = ReplayDispatcher::with_config(config);
        for source in ["masthead", "backup"] {
            let sink = log.clone();
            replay
                .dispatcher_mut()
                .subscribe::<Velocity, _>(DataCode::Aws, source, Duration::ZERO, move |s| {
                    sink.lock().unwrap().push((source.to_string(), s.time.as_secs()))
                })
                .unwrap();
        }
        replay.replay(src).unwrap();
        let log = log.lock().unwrap().clone();
        log
    }

    #[test]
    fn test_replay_is_deterministic() {
        let config = load_config(CONFIG);
        let src = recorded(&config);
        let first = replay_times(&src, &config);
        let times: Vec<f64> = first.iter().map(|(_, t)| *t).collect();
        assert_eq!(times, vec![0.0, 0.5, 1.0, 2.0, 10.0, 30.0]);
        assert_eq!(first, replay_times(&src, &config));
    }

    #[test]
    fn test_replay_with_clock_following_samples() {
        let mut config = load_config(CONFIG);
        config.replay.clock_mode = ClockMode::FollowSamples;
        let src = recorded(&config);

        let fired_at = Arc::new(Mutex::new(Vec::new()));
        let mut replay = ReplayDispatcher::with_config(&config);
        replay
            .replay_with_visitor(&src, |replay, code, source| {
                if code == DataCode::Aws && source.as_str() == "backup" {
                    let fired_at = fired_at.clone();
                    replay.set_timeout(
                        move |replay| fired_at.lock().unwrap().push(replay.current_time()),
                        1000,
                    );
                }
                Ok(())
            })
            .unwrap();

        // Timeouts fire when a later sample moves the clock past them; the
        // last one only when the replay finishes.
        assert_eq!(
            *fired_at.lock().unwrap(),
            vec![Some(ts(2.0)), Some(ts(30.0)), Some(ts(30.0))]
        );
        assert_eq!(replay.pending_timeouts(), 0);
    }

    /// Replay with a timeout per wind-speed sample; each fired timeout
    /// publishes a derived value. Returns the fire order and the final dump.
    fn replay_with_timeouts(src: &Dispatcher, config: &BusConfig) -> (Vec<String>, serde_json::Value) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut replay = ReplayDispatcher::with_config(config);
        replay
            .replay_with_visitor(src, |replay, code, source| {
                if code == DataCode::Aws {
                    let fired = fired.clone();
                    let label = source.to_string();
                    assert!(replay.set_timeout(
                        move |replay| {
                            let Some(now) = replay.current_time() else {
                                return;
                            };
                            fired.lock().unwrap().push(format!("{label}@{}", now.as_secs()));
                            replay
                                .dispatcher_mut()
                                .publish_value(DataCode::Tws, "calc", now, Velocity::from_knots(1.0))
                                .unwrap();
                        },
                        500,
                    ));
                }
                Ok(())
            })
            .unwrap();
        let fired = fired.lock().unwrap().clone();
        (fired, bus::to_json(replay.dispatcher()))
    }

    #[test]
    fn test_replay_timeouts_and_contents_are_deterministic() {
        let mut config = load_config(CONFIG);
        config.replay.clock_mode = ClockMode::FollowSamples;
        let src = recorded(&config);

        let (first_fired, first_dump) = replay_with_timeouts(&src, &config);
        assert_eq!(
            first_fired,
            vec![
                "masthead@0.5",
                "backup@1",
                "masthead@2",
                "masthead@10",
                "backup@30",
                "backup@30",
            ]
        );
        assert_eq!(first_dump["tws"]["calc"].as_array().map(Vec::len), Some(6));
        assert_eq!(first_dump["aws"]["backup"], bus::to_json(&src)["aws"]["backup"]);

        let (second_fired, second_dump) = replay_with_timeouts(&src, &config);
        assert_eq!(first_fired, second_fired);
        assert_eq!(first_dump, second_dump);
    }

    #[test]
    fn test_dump_is_json() {
        let config = load_config(CONFIG);
        let src = recorded(&config);
        let json = bus::to_json(&src);
        let sample = &json["aws"]["backup"][1];
        assert_eq!(sample[0].as_f64(), Some(10.0));
        assert_eq!(sample[1].as_f64(), Some(Velocity::from_knots(5.0).meters_per_second()));
        assert!(src.to_string().contains("named backup (prio: 1) with 3 samples"));
    }
}

#[cfg(test)]
mod queue_tests {
    use std::time::Duration;

    use bus::Dispatcher;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{DataCode, TimeStamp, Velocity};

    #[tokio::test]
    async fn test_queued_subscriber_drops_when_full() {
        let config =
            ConfigLoader::load_from_str("default_subscriber_queue = 2", ConfigFormat::Toml).unwrap();
        let mut d = Dispatcher::with_config(&config);
        let mut queued = d
            .subscribe_queued::<Velocity>(DataCode::Tws, "calc", Duration::ZERO)
            .unwrap();

        for t in 0..3 {
            d.publish_value(DataCode::Tws, "calc", TimeStamp::from_secs(t as f64), Velocity::from_knots(7.0))
                .unwrap();
        }

        assert_eq!(queued.queued(), 2);
        assert_eq!(queued.metrics().dropped_count(), 1);
        let first = queued.recv().await.unwrap();
        assert_eq!(first.time, TimeStamp::from_secs(0.0));

        // Detached: nothing new arrives, queued samples remain.
        assert!(queued.detach());
        d.publish_value(DataCode::Tws, "calc", TimeStamp::from_secs(9.0), Velocity::from_knots(7.0))
            .unwrap();
        assert_eq!(queued.recv().await.map(|s| s.time), Some(TimeStamp::from_secs(1.0)));
        assert!(queued.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_queued_subscriber_across_tasks() {
        let mut d = Dispatcher::new();
        let mut queued = d
            .subscribe_queued::<Velocity>(DataCode::Tws, "calc", Duration::from_secs(1))
            .unwrap();

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(sample) = queued.recv().await {
                seen.push(sample.time.as_secs());
                if seen.len() == 3 {
                    break;
                }
            }
            seen
        });

        // Throttled to one sample per second.
        for t in [0.0, 0.4, 1.0, 1.5, 2.2] {
            d.publish_value(DataCode::Tws, "calc", TimeStamp::from_secs(t), Velocity::from_knots(t))
                .unwrap();
        }

        assert_eq!(consumer.await.unwrap(), vec![0.0, 1.0, 2.2]);
    }
}
