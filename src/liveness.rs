use std::future::Future;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Result, ScanError};
use crate::probe::Prober;
use crate::types::Target;

/// Ports tried when the reachability signal says nothing.
pub const WELL_KNOWN_PORTS: [u16; 10] = [21, 22, 80, 443, 3306, 3389, 7000, 7001, 8000, 8080];

/// A platform reachability signal for one host.
pub trait Reachability: Send + Sync + 'static {
    fn is_reachable(
        &self,
        host: IpAddr,
        cancel: &CancellationToken,
    ) -> impl Future<Output = bool> + Send;
}

/// Sends one ICMP echo request through the system `ping` binary.
///
/// The child is killed if the timeout elapses or `cancel` fires first, and is
/// also spawned with `kill_on_drop` so an aborted caller cannot orphan it.
#[derive(Debug, Clone)]
pub struct IcmpReachability {
    timeout: Duration,
    program: String,
    args: Vec<String>,
}

impl IcmpReachability {
    pub fn new(timeout: Duration) -> Self {
        let args: Vec<String> = if cfg!(windows) {
            vec!["-n".into(), "1".into(), "-w".into(), timeout.as_millis().to_string()]
        } else if cfg!(target_os = "macos") {
            vec!["-c".into(), "1".into(), "-W".into(), timeout.as_millis().to_string()]
        } else {
            let secs = timeout.as_secs().max(1);
            vec!["-c".into(), "1".into(), "-W".into(), secs.to_string()]
        };
        Self {
            timeout,
            program: "ping".into(),
            args,
        }
    }

    /// Run `program args.. <host>` instead of the system ping.
    pub(crate) fn with_command(mut self, program: &str, args: &[&str]) -> Self {
        self.program = program.to_string();
        self.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    fn command(&self, host: IpAddr) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(host.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Reachability for IcmpReachability {
    fn is_reachable(
        &self,
        host: IpAddr,
        cancel: &CancellationToken,
    ) -> impl Future<Output = bool> + Send {
        let mut cmd = self.command(host);
        let program = self.program.clone();
        let timeout = self.timeout;
        let cancel = cancel.clone();
        async move {
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    warn!(%host, %program, error = %e, "failed to run reachability probe");
                    return false;
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    false
                }
                status = child.wait() => match status {
                    Ok(status) => status.success(),
                    Err(e) => {
                        debug!(%host, error = %e, "waiting on ping failed");
                        false
                    }
                },
                // grace period on top of ping's own deadline
                _ = time::sleep(timeout + Duration::from_millis(500)) => {
                    trace!(%host, "ping overran its timeout");
                    let _ = child.kill().await;
                    false
                }
            }
        }
    }
}

/// Reachability over TCP for hosts where ICMP is filtered or `ping` is unavailable.
///
/// A completed handshake or an explicit refusal both prove something answered
/// at that address.
#[derive(Debug, Clone, Copy)]
pub struct TcpFallbackReachability {
    port: u16,
    timeout: Duration,
}

impl TcpFallbackReachability {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

impl Reachability for TcpFallbackReachability {
    fn is_reachable(
        &self,
        host: IpAddr,
        cancel: &CancellationToken,
    ) -> impl Future<Output = bool> + Send {
        let target = Target::new(host, self.port);
        let timeout = self.timeout;
        let cancel = cancel.clone();
        async move {
            let connect = time::timeout(timeout, TcpStream::connect(target.socket_addr()));
            tokio::select! {
                _ = cancel.cancelled() => false,
                res = connect => match res {
                    Ok(Ok(_)) => true,
                    Ok(Err(e)) => e.kind() == ErrorKind::ConnectionRefused,
                    Err(_) => false,
                },
            }
        }
    }
}

/// Combines a reachability signal with well-known port probes to decide
/// whether a host is worth a full scan.
pub struct LivenessProber<R, P> {
    reachability: Arc<R>,
    prober: Arc<P>,
    ports: Vec<u16>,
}

impl<R, P> Clone for LivenessProber<R, P> {
    fn clone(&self) -> Self {
        Self {
            reachability: self.reachability.clone(),
            prober: self.prober.clone(),
            ports: self.ports.clone(),
        }
    }
}

impl<R: Reachability, P: Prober> LivenessProber<R, P> {
    pub fn new(reachability: R, prober: P) -> Self {
        Self {
            reachability: Arc::new(reachability),
            prober: Arc::new(prober),
            ports: WELL_KNOWN_PORTS.to_vec(),
        }
    }

    /// Replace the fallback port set.
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    /// A host is alive if the reachability signal says so, or else if any
    /// fallback port accepts a connection. The port probes only run when the
    /// signal is negative, and they all run at once.
    pub async fn probe_host(&self, host: IpAddr, cancel: &CancellationToken) -> bool {
        if self.reachability.is_reachable(host, cancel).await {
            trace!(%host, "reachability signal positive");
            return true;
        }
        if cancel.is_cancelled() {
            return false;
        }

        let mut set = JoinSet::new();
        for &port in &self.ports {
            let prober = self.prober.clone();
            set.spawn(async move { prober.probe(Target::new(host, port)).await });
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                next = set.join_next() => match next {
                    Some(Ok(true)) => {
                        trace!(%host, "fallback port answered");
                        return true;
                    }
                    Some(_) => {}
                    None => return false,
                },
            }
        }
    }

    /// Probe every host at once and keep the live ones, in input order.
    ///
    /// There is no admission gate here: a large host list means that many
    /// concurrent pings and connects.
    pub async fn find_living_hosts(
        &self,
        hosts: &[IpAddr],
        cancel: &CancellationToken,
    ) -> Result<Vec<IpAddr>> {
        let mut set = JoinSet::new();
        for (idx, &host) in hosts.iter().enumerate() {
            let this = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move { (idx, this.probe_host(host, &cancel).await) });
        }

        let mut alive = vec![false; hosts.len()];
        while let Some(res) = set.join_next().await {
            match res {
                Ok((idx, is_alive)) => alive[idx] = is_alive,
                Err(e) => warn!(error = %e, "liveness task failed"),
            }
        }
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        Ok(hosts
            .iter()
            .zip(alive)
            .filter_map(|(&host, is_alive)| is_alive.then_some(host))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    struct FixedReachability(HashSet<IpAddr>);

    impl Reachability for FixedReachability {
        fn is_reachable(
            &self,
            host: IpAddr,
            _cancel: &CancellationToken,
        ) -> impl Future<Output = bool> + Send {
            let hit = self.0.contains(&host);
            async move { hit }
        }
    }

    #[derive(Default)]
    struct CountingProber {
        open: HashSet<Target>,
        calls: AtomicUsize,
    }

    impl Prober for CountingProber {
        fn probe(&self, target: Target) -> impl Future<Output = bool> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hit = self.open.contains(&target);
            async move { hit }
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
    }

    #[tokio::test]
    async fn reachable_host_skips_port_probes() {
        let liveness = LivenessProber::new(
            FixedReachability([ip(1)].into_iter().collect()),
            CountingProber::default(),
        );
        assert!(liveness.probe_host(ip(1), &CancellationToken::new()).await);
        assert_eq!(liveness.prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_port_marks_host_alive() {
        let prober = CountingProber {
            open: [Target::new(ip(2), 3306)].into_iter().collect(),
            ..Default::default()
        };
        let liveness = LivenessProber::new(FixedReachability(HashSet::new()), prober);
        assert!(liveness.probe_host(ip(2), &CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn silent_host_probes_every_well_known_port() {
        let liveness =
            LivenessProber::new(FixedReachability(HashSet::new()), CountingProber::default());
        assert!(!liveness.probe_host(ip(3), &CancellationToken::new()).await);
        assert_eq!(
            liveness.prober.calls.load(Ordering::SeqCst),
            WELL_KNOWN_PORTS.len()
        );
    }

    #[tokio::test]
    async fn custom_fallback_ports_replace_the_defaults() {
        let prober = CountingProber {
            open: [Target::new(ip(10), 9443)].into_iter().collect(),
            ..Default::default()
        };
        let liveness = LivenessProber::new(FixedReachability(HashSet::new()), prober)
            .with_ports(vec![9000, 9443]);

        assert!(liveness.probe_host(ip(10), &CancellationToken::new()).await);
        assert!(!liveness.probe_host(ip(11), &CancellationToken::new()).await);
        assert_eq!(liveness.prober.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn find_living_hosts_keeps_input_order() {
        let prober = CountingProber {
            open: [Target::new(ip(9), 80)].into_iter().collect(),
            ..Default::default()
        };
        let liveness =
            LivenessProber::new(FixedReachability([ip(5)].into_iter().collect()), prober);
        let hosts = vec![ip(9), ip(4), ip(5), ip(6)];

        let alive = liveness
            .find_living_hosts(&hosts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(alive, vec![ip(9), ip(5)]);
    }

    #[tokio::test]
    async fn cancelled_discovery_reports_cancellation() {
        let liveness =
            LivenessProber::new(FixedReachability(HashSet::new()), CountingProber::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = liveness.find_living_hosts(&[ip(7)], &cancel).await;
        assert!(matches!(res, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_before_start_returns_promptly() {
        let icmp = IcmpReachability::new(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        assert!(!icmp.is_reachable(ip(8), &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_running_reachability_child() {
        let pid_file = std::env::temp_dir().join(format!(
            "portsweep-reach-pid-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&pid_file);
        // the host address lands in $0 and is ignored
        let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());
        let icmp = IcmpReachability::new(Duration::from_secs(30))
            .with_command("sh", &["-c", script.as_str()]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        assert!(!icmp.is_reachable(ip(12), &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());
        let still_running = std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .unwrap()
            .success();
        assert!(!still_running, "child {pid} outlived cancellation");
        std::fs::remove_file(&pid_file).unwrap();
    }

    #[tokio::test]
    async fn tcp_fallback_counts_refusal_as_reachable() {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let listener = TcpListener::bind((localhost, 0)).await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed_port = {
            let l = TcpListener::bind((localhost, 0)).await.unwrap();
            l.local_addr().unwrap().port()
        };
        let cancel = CancellationToken::new();

        let open = TcpFallbackReachability::new(open_port, Duration::from_secs(1));
        assert!(open.is_reachable(localhost, &cancel).await);
        let refused = TcpFallbackReachability::new(closed_port, Duration::from_secs(1));
        assert!(refused.is_reachable(localhost, &cancel).await);
    }
}
