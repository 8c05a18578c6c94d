//! Scan coordination.
//!
//! The [`Coordinator`] fans one probe pipeline per port out across tokio
//! tasks, bounded by a semaphore, and gathers results over a channel.
//! A pipeline is: connect (with optional retries after a timeout), then
//! service detection when the port is open. Cancellation and the global
//! deadline stop new dispatches; work already in flight finishes on its own
//! timeouts. Whatever never got dispatched is reported as not scanned.

pub mod tcp;
pub mod traits;

pub use tcp::TcpProber;
pub use traits::{
    Confidence, PortResult, PortState, ProbeOutcome, Prober, ScanReport, ServiceInfo,
};

use crate::config::{Capability, DetectionTier, ScanConfig};
use crate::detect::{DetectorRegistry, ProbeContext};
use crate::error::{ConfigError, ConfigResult, ScanError, ScanResult};
use crate::services;
use crate::types::{Port, PortSpec, ScanTarget, TargetSpec};
use chrono::Utc;
use futures::FutureExt;
use indicatif::ProgressBar;
use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One unit of dispatchable work.
#[derive(Debug, Clone, Copy)]
struct Job {
    port: Port,
    /// Dispatches so far that ended in local socket exhaustion.
    exhausted: u8,
}

/// What a worker reports back.
#[derive(Debug)]
enum WorkerMessage {
    Done(PortResult),
    /// Local resources ran out; try this port again later.
    Requeue(Job),
}

/// Shared, read-only state for the workers of one scan.
struct Pipeline<P> {
    target: ScanTarget,
    config: Arc<ScanConfig>,
    prober: Arc<P>,
    registry: Arc<DetectorRegistry>,
}

impl<P: Prober> Pipeline<P> {
    async fn run(&self, job: Job) -> WorkerMessage {
        let addr = SocketAddr::new(self.target.address, job.port.as_u16());
        let started = StdInstant::now();

        let mut outcome = self.prober.probe(addr, self.config.timeout()).await;
        let mut retries = 0;
        while outcome == ProbeOutcome::Filtered && retries < self.config.timeout_retries() {
            retries += 1;
            debug!(%addr, retries, "retrying after timeout");
            outcome = self.prober.probe(addr, self.config.timeout()).await;
        }

        let result = match outcome {
            ProbeOutcome::Closed => PortResult::closed(job.port, started.elapsed()),
            ProbeOutcome::Filtered => PortResult::filtered(job.port, started.elapsed()),
            ProbeOutcome::Exhausted(reason) if job.exhausted == 0 => {
                debug!(%addr, %reason, "local resources exhausted, requeueing");
                return WorkerMessage::Requeue(Job {
                    exhausted: job.exhausted + 1,
                    ..job
                });
            }
            ProbeOutcome::Exhausted(reason) => PortResult::filtered(job.port, started.elapsed())
                .with_note(format!("local resources exhausted: {reason}")),
            ProbeOutcome::Open => {
                let service = if self.config.detect_services() {
                    let ctx = ProbeContext::new(
                        addr,
                        self.target.server_name(),
                        self.config.detect_timeout(),
                    );
                    self.registry.identify(&ctx).await
                } else {
                    None
                };
                PortResult::open(job.port, started.elapsed()).with_service(service)
            }
        };

        WorkerMessage::Done(result)
    }
}

/// Runs scans against one or more targets with a fixed configuration.
///
/// Generic over the [`Prober`] so tests can swap in an instrumented one.
pub struct Coordinator<P = TcpProber> {
    config: Arc<ScanConfig>,
    prober: Arc<P>,
    registry: Arc<DetectorRegistry>,
    tier: DetectionTier,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl Coordinator<TcpProber> {
    /// A coordinator using real TCP connects and the standard detectors.
    ///
    /// A requested tier the build cannot provide is downgraded here, once.
    pub fn new(config: ScanConfig, capability: Capability) -> Self {
        let requested = config.detection_tier();
        let tier = capability.effective_tier(requested);
        if tier != requested {
            warn!(
                %requested,
                effective = %tier,
                "detection tier not available in this build, downgrading"
            );
        }

        Self {
            config: Arc::new(config),
            prober: Arc::new(TcpProber::new()),
            registry: Arc::new(DetectorRegistry::standard(tier)),
            tier,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }
}

impl<P: Prober + 'static> Coordinator<P> {
    /// Replace the prober.
    pub fn with_prober<Q: Prober + 'static>(self, prober: Q) -> Coordinator<Q> {
        Coordinator {
            config: self.config,
            prober: Arc::new(prober),
            registry: self.registry,
            tier: self.tier,
            cancel: self.cancel,
            progress: self.progress,
        }
    }

    /// Replace the detector table.
    pub fn with_registry(mut self, registry: DetectorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Stop dispatching when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Tick `progress` once per finished port.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Token that cancels this coordinator's scans.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tier scans actually run at.
    pub fn tier(&self) -> DetectionTier {
        self.tier
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Resolve each host and scan every resulting address.
    ///
    /// Hosts that fail to resolve get a report carrying the error instead of
    /// results; the other hosts are still scanned.
    pub async fn scan_hosts<S: AsRef<str>>(
        &self,
        hosts: &[S],
        ports: &PortSpec,
    ) -> ConfigResult<Vec<ScanReport>> {
        if ports.is_empty() {
            return Err(ConfigError::EmptyPortSet);
        }

        let mut reports = Vec::new();
        for host in hosts {
            let host = host.as_ref();
            match self.scan_host(host, ports).await {
                Ok(mut host_reports) => reports.append(&mut host_reports),
                Err(ScanError::Resolution(e)) => {
                    warn!(host, error = %e, "skipping target");
                    reports.push(ScanReport::unresolved(host, self.tier, e));
                }
                Err(ScanError::Config(e)) => return Err(e),
            }
        }
        Ok(reports)
    }

    /// Resolve one host (IP, hostname, or CIDR) and scan each address.
    pub async fn scan_host(&self, host: &str, ports: &PortSpec) -> ScanResult<Vec<ScanReport>> {
        let targets = TargetSpec::parse(host)?
            .resolve(self.config.timeout())
            .await?;

        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            reports.push(self.scan(&target, ports).await?);
        }
        Ok(reports)
    }

    /// Scan `ports` on one resolved target.
    ///
    /// The report lists every requested port exactly once, ascending.
    pub async fn scan(&self, target: &ScanTarget, ports: &PortSpec) -> ConfigResult<ScanReport> {
        let port_list = ports.to_ports();
        if port_list.is_empty() {
            return Err(ConfigError::EmptyPortSet);
        }

        let started_at = Utc::now();
        let started = StdInstant::now();
        let deadline = self
            .config
            .deadline()
            .and_then(|d| Instant::now().checked_add(d));
        info!(
            %target,
            ports = port_list.len(),
            concurrency = self.config.concurrency(),
            tier = %self.tier,
            "starting scan"
        );
        if let Some(pb) = &self.progress {
            pb.set_length(port_list.len() as u64);
            pb.set_position(0);
        }

        let pipeline = Arc::new(Pipeline {
            target: target.clone(),
            config: Arc::clone(&self.config),
            prober: Arc::clone(&self.prober),
            registry: Arc::clone(&self.registry),
        });
        let permits = Arc::new(Semaphore::new(self.config.concurrency()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut queue: VecDeque<Job> = port_list
            .iter()
            .map(|&port| Job { port, exhausted: 0 })
            .collect();
        let mut done: BTreeMap<Port, PortResult> = BTreeMap::new();
        let mut in_flight = 0usize;
        let mut halted = false;

        let deadline_reached = wait_until(deadline);
        tokio::pin!(deadline_reached);

        loop {
            if in_flight == 0 && (halted || queue.is_empty()) {
                break;
            }

            tokio::select! {
                biased;

                Some(message) = rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    match message {
                        WorkerMessage::Done(result) => {
                            self.record_progress(&result);
                            done.insert(result.port, result);
                        }
                        WorkerMessage::Requeue(job) => queue.push_back(job),
                    }
                }
                _ = self.cancel.cancelled(), if !halted => {
                    info!(in_flight, pending = queue.len(), "scan cancelled");
                    halted = true;
                }
                _ = &mut deadline_reached, if !halted => {
                    info!(in_flight, pending = queue.len(), "global deadline reached");
                    halted = true;
                }
                permit = Arc::clone(&permits).acquire_owned(), if !halted && !queue.is_empty() => {
                    let Ok(permit) = permit else {
                        halted = true;
                        continue;
                    };
                    if self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
                        continue;
                    }
                    let Some(job) = queue.pop_front() else {
                        continue;
                    };

                    in_flight += 1;
                    let pipeline = Arc::clone(&pipeline);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let port = job.port;
                        let message = AssertUnwindSafe(pipeline.run(job))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                warn!(%port, "port pipeline panicked");
                                WorkerMessage::Done(
                                    PortResult::filtered(port, std::time::Duration::ZERO)
                                        .with_note("probe failed unexpectedly"),
                                )
                            });
                        let _ = tx.send(message);
                    });
                }
                else => break,
            }
        }

        let interrupted = !queue.is_empty();
        for job in queue {
            done.entry(job.port)
                .or_insert_with(|| PortResult::not_scanned(job.port));
        }

        let results: Vec<PortResult> = done
            .into_values()
            .map(|result| {
                let expected = ports
                    .label(result.port)
                    .map(str::to_string)
                    .or_else(|| services::service_name(result.port.as_u16()).map(str::to_string));
                result.with_expected(expected)
            })
            .collect();

        let report = ScanReport {
            target: target.host.clone(),
            address: Some(target.address),
            started_at,
            duration: started.elapsed(),
            tier: self.tier,
            show_closed: self.config.show_closed(),
            interrupted,
            error: None,
            results,
        };
        info!(summary = %report.summary(), "scan finished");
        Ok(report)
    }

    fn record_progress(&self, result: &PortResult) {
        if let Some(pb) = &self.progress {
            pb.inc(1);
            if result.is_open() {
                pb.set_message(format!("found open port {}", result.port));
            }
        }
    }
}

/// Resolves at `deadline`, or never without one.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rand::Rng;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn target() -> ScanTarget {
        ScanTarget::new("test-host", IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn config() -> ScanConfig {
        ScanConfig::builder()
            .timeout(Duration::from_millis(200))
            .concurrency(5)
            .detect_services(false)
            .build()
            .unwrap()
    }

    fn coordinator<P: Prober + 'static>(config: ScanConfig, prober: P) -> Coordinator<P> {
        Coordinator::new(config, Capability::basic_only()).with_prober(prober)
    }

    /// Odd ports are open, even ports closed, each after a random delay.
    #[derive(Default)]
    struct JitterProber {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl Prober for JitterProber {
        async fn probe(&self, addr: SocketAddr, _timeout: Duration) -> ProbeOutcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(addr.port());

            let delay = rand::thread_rng().gen_range(1..20);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            if addr.port() % 2 == 1 {
                ProbeOutcome::Open
            } else {
                ProbeOutcome::Closed
            }
        }
    }

    /// Every probe sleeps for a fixed time, then reports filtered.
    struct SlowProber(Duration);

    #[async_trait]
    impl Prober for SlowProber {
        async fn probe(&self, _addr: SocketAddr, _timeout: Duration) -> ProbeOutcome {
            tokio::time::sleep(self.0).await;
            ProbeOutcome::Filtered
        }
    }

    /// Fails with exhaustion a fixed number of times per port, then opens.
    struct ExhaustedProber {
        failures: usize,
        seen: Mutex<BTreeMap<u16, usize>>,
    }

    #[async_trait]
    impl Prober for ExhaustedProber {
        async fn probe(&self, addr: SocketAddr, _timeout: Duration) -> ProbeOutcome {
            let mut seen = self.seen.lock().unwrap();
            let count = seen.entry(addr.port()).or_insert(0);
            *count += 1;
            if *count <= self.failures {
                ProbeOutcome::Exhausted("too many open files".to_string())
            } else {
                ProbeOutcome::Open
            }
        }
    }

    /// Times out a fixed number of times, then refuses.
    struct FlakyProber {
        timeouts: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for FlakyProber {
        async fn probe(&self, _addr: SocketAddr, _timeout: Duration) -> ProbeOutcome {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.timeouts {
                ProbeOutcome::Filtered
            } else {
                ProbeOutcome::Closed
            }
        }
    }

    struct PanickingProber;

    #[async_trait]
    impl Prober for PanickingProber {
        async fn probe(&self, addr: SocketAddr, _timeout: Duration) -> ProbeOutcome {
            if addr.port() == 13 {
                panic!("prober bug");
            }
            ProbeOutcome::Closed
        }
    }

    #[tokio::test]
    async fn test_results_ordered_complete_and_unique() {
        let spec: PortSpec = "1-60".parse().unwrap();
        let report = coordinator(config(), JitterProber::default())
            .scan(&target(), &spec)
            .await
            .unwrap();

        let ports: Vec<u16> = report.results.iter().map(|r| r.port.as_u16()).collect();
        assert_eq!(ports, (1..=60).collect::<Vec<_>>());
        assert!(!report.interrupted);
        assert_eq!(report.open_count(), 30);
        assert_eq!(report.closed_count(), 30);
        assert!(report.results.iter().all(|r| r.service.is_none()));
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let prober = Arc::new(JitterProber::default());
        let spec: PortSpec = "1000-1049".parse().unwrap();

        let coordinator = Coordinator::new(config(), Capability::basic_only())
            .with_prober(SharedProber(Arc::clone(&prober)));
        coordinator.scan(&target(), &spec).await.unwrap();

        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak concurrency {peak} exceeded the limit");
        assert!(peak >= 1);

        let calls = prober.calls.lock().unwrap();
        assert_eq!(calls.len(), 50);
        assert_eq!(calls.iter().collect::<HashSet<_>>().len(), 50);
    }

    struct SharedProber(Arc<JitterProber>);

    #[async_trait]
    impl Prober for SharedProber {
        async fn probe(&self, addr: SocketAddr, timeout: Duration) -> ProbeOutcome {
            self.0.probe(addr, timeout).await
        }
    }

    #[tokio::test]
    async fn test_deadline_marks_remaining_not_scanned() {
        let config = ScanConfig::builder()
            .timeout(Duration::from_millis(200))
            .concurrency(2)
            .detect_services(false)
            .deadline(Some(Duration::from_millis(120)))
            .build()
            .unwrap();
        let spec: PortSpec = "1-20".parse().unwrap();

        let report = coordinator(config, SlowProber(Duration::from_millis(50)))
            .scan(&target(), &spec)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.results.len(), 20);
        assert!(report.filtered_count() >= 2);
        assert!(report.not_scanned_count() > 0);
        assert_eq!(report.filtered_count() + report.not_scanned_count(), 20);
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_report() {
        let spec: PortSpec = "1-40".parse().unwrap();
        let coordinator = coordinator(config(), SlowProber(Duration::from_millis(40)));
        let token = coordinator.cancellation_token();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            token.cancel();
        });

        let report = coordinator.scan(&target(), &spec).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.results.len(), 40);
        assert!(report.filtered_count() > 0);
        assert!(report.not_scanned_count() > 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let spec: PortSpec = "1-5".parse().unwrap();
        let coordinator = coordinator(config(), SlowProber(Duration::from_millis(10)));
        coordinator.cancellation_token().cancel();

        let report = coordinator.scan(&target(), &spec).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.not_scanned_count(), 5);
    }

    #[tokio::test]
    async fn test_exhaustion_requeued_once() {
        let spec: PortSpec = "1-3".parse().unwrap();

        let report = coordinator(
            config(),
            ExhaustedProber {
                failures: 1,
                seen: Mutex::new(BTreeMap::new()),
            },
        )
        .scan(&target(), &spec)
        .await
        .unwrap();
        assert_eq!(report.open_count(), 3);

        let report = coordinator(
            config(),
            ExhaustedProber {
                failures: 2,
                seen: Mutex::new(BTreeMap::new()),
            },
        )
        .scan(&target(), &spec)
        .await
        .unwrap();
        assert_eq!(report.filtered_count(), 3);
        assert!(report.results[0].note.as_deref().unwrap().contains("exhausted"));
    }

    #[tokio::test]
    async fn test_timeout_is_final_without_retries() {
        let spec: PortSpec = "80".parse().unwrap();
        let prober = FlakyProber {
            timeouts: 1,
            calls: AtomicUsize::new(0),
        };
        let report = coordinator(config(), prober).scan(&target(), &spec).await.unwrap();
        assert_eq!(report.results[0].state, PortState::Filtered);
    }

    #[tokio::test]
    async fn test_timeout_retries() {
        let config = ScanConfig::builder()
            .timeout(Duration::from_millis(200))
            .detect_services(false)
            .timeout_retries(2)
            .build()
            .unwrap();
        let spec: PortSpec = "80".parse().unwrap();
        let prober = FlakyProber {
            timeouts: 2,
            calls: AtomicUsize::new(0),
        };
        let report = coordinator(config, prober).scan(&target(), &spec).await.unwrap();
        assert_eq!(report.results[0].state, PortState::Closed);
    }

    #[tokio::test]
    async fn test_panicking_probe_still_reported() {
        let spec: PortSpec = "10-15".parse().unwrap();
        let report = coordinator(config(), PanickingProber)
            .scan(&target(), &spec)
            .await
            .unwrap();

        assert_eq!(report.results.len(), 6);
        let port13 = report.results.iter().find(|r| r.port.as_u16() == 13).unwrap();
        assert_eq!(port13.state, PortState::Filtered);
        assert!(port13.note.is_some());
        assert_eq!(report.closed_count(), 5);
    }

    #[tokio::test]
    async fn test_expected_labels() {
        let mut spec: PortSpec = "22".parse().unwrap();
        spec.add_labeled(Port::new(9999).unwrap(), "Custom Admin");

        let report = coordinator(config(), SlowProber(Duration::ZERO))
            .scan(&target(), &spec)
            .await
            .unwrap();
        assert_eq!(report.results[0].expected.as_deref(), Some("SSH"));
        assert_eq!(report.results[1].expected.as_deref(), Some("Custom Admin"));
    }

    #[tokio::test]
    async fn test_empty_port_set_rejected() {
        let result = coordinator(config(), SlowProber(Duration::ZERO))
            .scan(&target(), &PortSpec::new())
            .await;
        assert!(matches!(result, Err(ConfigError::EmptyPortSet)));
    }

    #[tokio::test]
    async fn test_unresolvable_host_gets_error_report() {
        let spec: PortSpec = "80".parse().unwrap();
        let reports = coordinator(config(), SlowProber(Duration::ZERO))
            .scan_hosts(&["not a host!", "127.0.0.1"], &spec)
            .await
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports[0].error.is_some());
        assert!(reports[0].results.is_empty());
        assert_eq!(reports[1].results.len(), 1);
    }

    #[test]
    fn test_downgrade_without_capability() {
        let config = ScanConfig::builder()
            .detection_tier(DetectionTier::Enhanced)
            .build()
            .unwrap();
        let coordinator = Coordinator::new(config, Capability::basic_only());
        assert_eq!(coordinator.tier(), DetectionTier::Basic);
    }
}
