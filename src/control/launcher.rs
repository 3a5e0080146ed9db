//! Per-tick scheduler: decides which hosts are due and runs their cycles in turn.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::types::{HostConfig, HushConfig, SensorGroup};
use crate::control::machine::Machine;
use crate::control::pid::PidBank;
use crate::error::HushError;
use crate::hardware::{DriverSpec, Registry};
use crate::monitor::{Status, StatusSink};

#[derive(Default)]
struct LoopState {
    last_run: HashMap<String, Instant>,
    pids: PidBank,
}

pub struct Launcher {
    registry: Registry,
    sink: Arc<dyn StatusSink>,
    accepting: AtomicBool,
    state: Mutex<LoopState>,
}

impl Launcher {
    pub fn new(registry: Registry, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            registry,
            sink,
            accepting: AtomicBool::new(true),
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run the cycle of every host whose delay has elapsed. Hosts run one after another.
    pub async fn tick(&self, config: &HushConfig, now: Instant) {
        self.run(config, now, false).await;
    }

    /// Run every primary host once, ignoring delays.
    pub async fn run_all(&self, config: &HushConfig, now: Instant) {
        self.run(config, now, true).await;
    }

    async fn run(&self, config: &HushConfig, now: Instant, force: bool) {
        if !self.is_accepting() {
            return;
        }
        let mut state = self.state.lock().await;
        if !self.is_accepting() {
            return;
        }
        let LoopState { last_run, pids } = &mut *state;

        for (name, host) in &config.hosts {
            let due = force
                || (host.delay > 0
                    && last_run
                        .get(name)
                        .map_or(true, |last| now.saturating_duration_since(*last) >= Duration::from_secs(host.delay)));
            if !due {
                continue;
            }

            if host.speed.is_shared() {
                // Valid shares run with their primary.
                if let Err(e) = DriverSpec::resolve(config, name, SensorGroup::Speed) {
                    self.report_failure(name, host, &e);
                    last_run.insert(name.clone(), now);
                }
                continue;
            }

            let shared = sharing_hosts(config, name);
            let mut machine = Machine { registry: &self.registry, config, pids: &mut *pids };
            match machine.run(name, &shared, now).await {
                Ok(statuses) => {
                    for status in statuses {
                        self.sink.submit(status);
                    }
                }
                Err(e) => self.report_failure(name, host, &e),
            }
            last_run.insert(name.clone(), now);
        }

        last_run.retain(|host, _| config.hosts.contains_key(host));
        pids.retain(|host| config.hosts.contains_key(host));
        drop(state);
        self.registry.retain_hosts(config).await;
        self.sink.retain(config);
    }

    fn report_failure(&self, name: &str, host: &HostConfig, e: &HushError) {
        let context = serde_json::to_string(&host.redacted()).unwrap_or_default();
        error!("{} cycle failed: {} config = {}", name, e, context);
        self.sink.submit(Status::failed(name));
    }

    /// Stop accepting ticks, wait for the running one and close every driver.
    pub async fn quiesce(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let _state = self.state.lock().await;
        self.registry.close_all().await;
        info!("control loop stopped, all drivers closed");
    }
}

/// Hosts that delegate their speed control to `primary`.
pub fn sharing_hosts(config: &HushConfig, primary: &str) -> Vec<String> {
    config
        .hosts
        .iter()
        .filter(|(_, h)| h.speed.is_shared() && h.shared_target(SensorGroup::Speed) == Some(primary))
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{AlgoConfig, AlgoKind, DriverSelection, HostConfig, Level, PidTuning, Vendor};
    use crate::hardware::mock::{Event, MockFactory};
    use crate::hardware::types::SpeedValue;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<Status>>);

    impl StatusSink for Recorder {
        fn submit(&self, status: Status) {
            self.0.lock().unwrap().push(status);
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<Status> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn launcher() -> (Launcher, MockFactory, Arc<Recorder>) {
        let factory = MockFactory::new();
        let recorder = Arc::new(Recorder::default());
        let launcher = Launcher::new(Registry::new(Arc::new(factory.clone())), recorder.clone());
        (launcher, factory, recorder)
    }

    fn pwm_host() -> HostConfig {
        HostConfig {
            speed: DriverSelection::Vendor(Vendor::SupermicroX10),
            cpu: DriverSelection::Vendor(Vendor::SupermicroX10),
            ..Default::default()
        }
    }

    /// Linear curve where speed equals temperature between 20 and 100 degrees.
    fn identity_curve() -> AlgoConfig {
        let mut algo = AlgoConfig::default();
        for (level, t) in Level::ALL.iter().zip([20, 40, 60, 80, 100]) {
            algo.curve.temp.insert(*level, t);
            algo.curve.speed.insert(*level, Some(crate::config::types::CurveSpeed::Percent(f64::from(t))));
        }
        algo
    }

    fn config(hosts: Vec<(&str, HostConfig)>) -> HushConfig {
        HushConfig {
            hosts: hosts.into_iter().map(|(n, h)| (n.to_string(), h)).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn highest_group_wins() {
        let (launcher, factory, recorder) = launcher();
        let mut host = pwm_host();
        host.drive = DriverSelection::Vendor(Vendor::Smart);
        host.algo.insert(SensorGroup::Cpu, identity_curve());
        host.algo.insert(SensorGroup::Drive, identity_curve());
        let cfg = config(vec![("x10", host)]);
        factory.set_temp("x10", SensorGroup::Cpu, 40);
        factory.set_temp("x10", SensorGroup::Drive, 70);

        launcher.tick(&cfg, Instant::now()).await;
        assert_eq!(factory.speeds(), vec![("x10".to_string(), SpeedValue::Percent(70))]);
        let statuses = recorder.take();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].success);
        assert_eq!(statuses[0].temperatures[&SensorGroup::Drive], 70);
    }

    #[tokio::test]
    async fn shared_hosts_get_one_write_and_their_own_status() {
        let (launcher, factory, recorder) = launcher();
        let mut primary = pwm_host();
        primary.algo.insert(SensorGroup::Cpu, identity_curve());
        let mut jbod = HostConfig {
            speed: DriverSelection::Shared,
            chassis: DriverSelection::Vendor(Vendor::OpenJbod),
            ..Default::default()
        };
        jbod.shared.insert(SensorGroup::Speed, "x10".into());
        jbod.algo.insert(SensorGroup::Chassis, identity_curve());
        let cfg = config(vec![("x10", primary), ("jbod", jbod)]);
        factory.set_temp("x10", SensorGroup::Cpu, 30);
        factory.set_temp("jbod", SensorGroup::Chassis, 55);

        launcher.tick(&cfg, Instant::now()).await;
        assert_eq!(factory.speeds(), vec![("x10".to_string(), SpeedValue::Percent(55))]);
        let statuses = recorder.take();
        assert_eq!(statuses.len(), 2);
        for status in &statuses {
            assert!(status.success);
            assert_eq!(status.speed, Some(SpeedValue::Percent(55)));
        }
        let jbod_status = statuses.iter().find(|s| s.host == "jbod").unwrap();
        assert_eq!(jbod_status.temperatures.get(&SensorGroup::Chassis), Some(&55));
        assert!(jbod_status.temperatures.get(&SensorGroup::Cpu).is_none());
    }

    #[tokio::test]
    async fn failing_host_does_not_stop_the_next() {
        let (launcher, factory, recorder) = launcher();
        let cfg = config(vec![("a-broken", pwm_host()), ("b-fine", pwm_host())]);
        factory.fail_temp("a-broken", SensorGroup::Cpu);
        factory.set_temp("b-fine", SensorGroup::Cpu, 45);

        launcher.tick(&cfg, Instant::now()).await;
        let statuses = recorder.take();
        assert_eq!(statuses.len(), 2);
        assert_eq!((statuses[0].host.as_str(), statuses[0].success), ("a-broken", false));
        assert_eq!((statuses[1].host.as_str(), statuses[1].success), ("b-fine", true));
        assert_eq!(factory.speeds().len(), 1);
    }

    #[tokio::test]
    async fn host_without_sensors_fails() {
        let (launcher, _factory, recorder) = launcher();
        let host = HostConfig { speed: DriverSelection::Vendor(Vendor::SupermicroX10), ..Default::default() };
        launcher.tick(&config(vec![("idle", host)]), Instant::now()).await;
        assert!(!recorder.take()[0].success);
    }

    #[tokio::test]
    async fn monitor_only_host_reports_without_speed() {
        let (launcher, factory, recorder) = launcher();
        let host = HostConfig { drive: DriverSelection::Vendor(Vendor::Smart), ..Default::default() };
        factory.set_temp("nas", SensorGroup::Drive, 38);

        launcher.tick(&config(vec![("nas", host)]), Instant::now()).await;
        let status = recorder.take().remove(0);
        assert!(status.success);
        assert_eq!(status.speed, None);
        assert!(factory.speeds().is_empty());
    }

    #[tokio::test]
    async fn delay_gates_reruns() {
        let (launcher, factory, recorder) = launcher();
        let mut host = pwm_host();
        host.delay = 30;
        let mut disabled = pwm_host();
        disabled.delay = 0;
        let cfg = config(vec![("x10", host), ("off", disabled)]);
        factory.set_temp("x10", SensorGroup::Cpu, 45);
        factory.set_temp("off", SensorGroup::Cpu, 45);

        let start = Instant::now();
        launcher.tick(&cfg, start).await;
        launcher.tick(&cfg, start + Duration::from_secs(29)).await;
        assert_eq!(recorder.take().len(), 1);
        launcher.tick(&cfg, start + Duration::from_secs(30)).await;
        let statuses = recorder.take();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].host, "x10");

        launcher.run_all(&cfg, start + Duration::from_secs(31)).await;
        assert_eq!(recorder.take().len(), 2);
    }

    #[tokio::test]
    async fn pid_hosts_use_vendor_limits() {
        let (launcher, factory, _recorder) = launcher();
        let mut host = pwm_host();
        host.algo.insert(
            SensorGroup::Cpu,
            AlgoConfig {
                kind: AlgoKind::Pid,
                pid: Some(PidTuning { kp: 1.0, ki: 0.0, kd: 0.0, target: 40.0 }),
                ..Default::default()
            },
        );
        factory.set_temp("x10", SensorGroup::Cpu, 30);
        launcher.tick(&config(vec![("x10", host)]), Instant::now()).await;
        assert_eq!(factory.speeds(), vec![("x10".to_string(), SpeedValue::Percent(5))]);
    }

    #[tokio::test]
    async fn removed_hosts_are_cleaned_up() {
        let (launcher, factory, _recorder) = launcher();
        let mut cfg = config(vec![("a", pwm_host()), ("b", pwm_host())]);
        factory.set_temp("a", SensorGroup::Cpu, 45);
        factory.set_temp("b", SensorGroup::Cpu, 45);
        let start = Instant::now();
        launcher.tick(&cfg, start).await;
        assert_eq!(launcher.registry().len().await, 4);

        cfg.hosts.remove("b");
        launcher.tick(&cfg, start + Duration::from_secs(1)).await;
        assert_eq!(launcher.registry().len().await, 2);
        assert_eq!(factory.closes(), 2);
        assert!(launcher.state.lock().await.last_run.get("b").is_none());
    }

    #[tokio::test]
    async fn quiesce_closes_everything_and_stops_ticks() {
        let (launcher, factory, recorder) = launcher();
        let cfg = config(vec![("x10", pwm_host())]);
        factory.set_temp("x10", SensorGroup::Cpu, 45);
        let start = Instant::now();
        launcher.tick(&cfg, start).await;
        recorder.take();

        launcher.quiesce().await;
        assert!(!launcher.is_accepting());
        assert!(launcher.registry().is_empty().await);
        assert_eq!(factory.closes(), 2);

        launcher.tick(&cfg, start + Duration::from_secs(60)).await;
        assert!(recorder.take().is_empty());
        let creates = factory.events().iter().filter(|e| matches!(e, Event::Create(..))).count();
        assert_eq!(creates, 2, "no driver may be built after quiesce");
    }

    #[tokio::test]
    async fn switching_speed_to_shared_closes_the_old_driver() {
        let (launcher, factory, _recorder) = launcher();
        let jbod = HostConfig {
            speed: DriverSelection::Vendor(Vendor::OpenJbod),
            chassis: DriverSelection::Vendor(Vendor::OpenJbod),
            ..Default::default()
        };
        let mut cfg = config(vec![("x10", pwm_host()), ("jbod", jbod)]);
        factory.set_temp("x10", SensorGroup::Cpu, 45);
        factory.set_temp("jbod", SensorGroup::Chassis, 40);
        let start = Instant::now();
        launcher.tick(&cfg, start).await;
        assert_eq!(launcher.registry().len().await, 4);

        let jbod = cfg.host_mut("jbod");
        jbod.speed = DriverSelection::Shared;
        jbod.shared.insert(SensorGroup::Speed, "x10".into());
        for i in 1..=4 {
            launcher.tick(&cfg, start + Duration::from_secs(60 * i)).await;
        }
        let closed = Event::Close("jbod".into(), SensorGroup::Speed);
        assert_eq!(factory.events().iter().filter(|e| **e == closed).count(), 1);
        assert_eq!(factory.closes(), 1);
        assert_eq!(launcher.registry().len().await, 3);
    }

    #[tokio::test]
    async fn dangling_share_reports_a_failure() {
        let (launcher, factory, recorder) = launcher();
        let mut orphan = HostConfig {
            speed: DriverSelection::Shared,
            chassis: DriverSelection::Vendor(Vendor::OpenJbod),
            delay: 30,
            ..Default::default()
        };
        orphan.shared.insert(SensorGroup::Speed, "gone".into());
        let cfg = config(vec![("orphan", orphan)]);

        let start = Instant::now();
        launcher.tick(&cfg, start).await;
        launcher.tick(&cfg, start + Duration::from_secs(1)).await;
        let statuses = recorder.take();
        assert_eq!(statuses.len(), 1);
        assert_eq!((statuses[0].host.as_str(), statuses[0].success), ("orphan", false));
        assert!(factory.events().is_empty());
    }

    #[tokio::test]
    async fn quiesce_waits_for_the_running_cycle() {
        let (launcher, factory, _recorder) = launcher();
        let launcher = Arc::new(launcher);
        let cfg = Arc::new(config(vec![("x10", pwm_host())]));
        factory.set_temp("x10", SensorGroup::Cpu, 45);
        let gate = factory.hold_temps();

        let ticking = tokio::spawn({
            let (launcher, cfg) = (launcher.clone(), cfg.clone());
            async move { launcher.tick(&cfg, Instant::now()).await }
        });
        while factory.creates() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let quiescing = tokio::spawn({
            let launcher = launcher.clone();
            async move { launcher.quiesce().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!quiescing.is_finished());
        assert_eq!(factory.closes(), 0);

        gate.notify_one();
        ticking.await.unwrap();
        quiescing.await.unwrap();

        let events = factory.events();
        let set = events.iter().position(|e| matches!(e, Event::SetSpeed(..))).unwrap();
        let first_close = events.iter().position(|e| matches!(e, Event::Close(..))).unwrap();
        assert!(set < first_close, "drivers closed before the cycle finished: {:?}", events);
        assert_eq!(factory.closes(), 2);
        assert!(launcher.registry().is_empty().await);
    }
}
