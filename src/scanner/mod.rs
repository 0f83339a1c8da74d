use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;

/// Well-known ports checked when a scan requests port enumeration.
const PORT_TARGETS: &[u16] = &[22, 23, 53, 80, 443, 161, 162, 3389];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    IdleCompleted,
    IdleStopped,
    IdleError,
}

impl ScanState {
    fn is_idle(self) -> bool {
        !matches!(self, ScanState::Scanning)
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub timeout_ms: u64,
    pub concurrent: usize,
    pub include_ports: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            concurrent: 50,
            include_ports: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredHost {
    pub ip: Ipv4Addr,
    pub rtt_ms: Option<u64>,
    pub ports: Option<Vec<u16>>,
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub range: String,
    pub total_scanned: usize,
    pub discovered: Vec<DiscoveredHost>,
    pub duration_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("invalid range specification: {0}")]
    InvalidRange(String),
    #[error("a scan is already in progress")]
    Busy,
}

/// Parses the three supported range forms into an ordered list of hosts.
/// - `A.B.C.D` — single host.
/// - `A.B.C.D-N` — `A.B.C.D` through `A.B.C.N` inclusive.
/// - `A.B.C.D/24` — the 254 usable hosts in that /24 (.1 through .254).
pub fn parse_range(spec: &str) -> Result<Vec<Ipv4Addr>, ScanError> {
    let spec = spec.trim();

    if let Some((base, cidr)) = spec.split_once('/') {
        let prefix: u32 = cidr
            .parse()
            .map_err(|_| ScanError::InvalidRange(spec.to_string()))?;
        if prefix != 24 {
            return Err(ScanError::InvalidRange(format!(
                "unsupported CIDR prefix /{prefix} (only /24 is supported)"
            )));
        }
        let base: Ipv4Addr = base
            .parse()
            .map_err(|_| ScanError::InvalidRange(spec.to_string()))?;
        let octets = base.octets();
        return Ok((1..=254u8)
            .map(|last| Ipv4Addr::new(octets[0], octets[1], octets[2], last))
            .collect());
    }

    if let Some((base, end)) = spec.rsplit_once('-') {
        let base: Ipv4Addr = base
            .parse()
            .map_err(|_| ScanError::InvalidRange(spec.to_string()))?;
        let end_octet: u8 = end
            .parse()
            .map_err(|_| ScanError::InvalidRange(spec.to_string()))?;
        let octets = base.octets();
        if end_octet < octets[3] {
            return Err(ScanError::InvalidRange(format!(
                "range end {end_octet} precedes start octet {}",
                octets[3]
            )));
        }
        return Ok((octets[3]..=end_octet)
            .map(|last| Ipv4Addr::new(octets[0], octets[1], octets[2], last))
            .collect());
    }

    Ipv4Addr::from_str(spec)
        .map(|ip| vec![ip])
        .map_err(|_| ScanError::InvalidRange(spec.to_string()))
}

/// Sweeps IP ranges for responsive hosts with bounded concurrency, emitting
/// progress events as it goes. Only one scan may run at a time.
#[derive(Clone)]
pub struct Scanner {
    pub(crate) state: std::sync::Arc<RwLock<ScanState>>,
    stop_requested: std::sync::Arc<std::sync::atomic::AtomicBool>,
    broadcaster: Broadcaster,
}

impl Scanner {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self {
            state: std::sync::Arc::new(RwLock::new(ScanState::Idle)),
            stop_requested: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            broadcaster,
        }
    }

    pub async fn state(&self) -> ScanState {
        *self.state.read().await
    }

    /// Transitions out of `Scanning` at the next batch boundary without
    /// interrupting in-flight probes.
    pub fn stop(&self) {
        self.stop_requested.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    async fn try_start(&self) -> Result<(), ScanError> {
        let mut state = self.state.write().await;
        if !state.is_idle() {
            return Err(ScanError::Busy);
        }
        *state = ScanState::Scanning;
        self.stop_requested.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    pub async fn scan(&self, range: &str, options: ScanOptions) -> Result<ScanSummary, ScanError> {
        self.try_start().await?;

        let hosts = match parse_range(range) {
            Ok(h) => h,
            Err(e) => {
                *self.state.write().await = ScanState::IdleError;
                self.broadcaster
                    .publish("scan_error", json!({"range": range, "error": e.to_string()}))
                    .await;
                return Err(e);
            }
        };

        let total = hosts.len();
        let start = std::time::Instant::now();
        self.broadcaster
            .publish("scan_started", json!({"range": range, "total": total}))
            .await;
        info!(range, total, "scan started");

        let mut discovered = Vec::new();
        let mut scanned = 0usize;
        let mut stopped = false;

        let mut batches = stream::iter(hosts).chunks(options.concurrent.max(1));
        while let Some(batch) = batches.next().await {
            if self.stop_requested.load(std::sync::atomic::Ordering::SeqCst) {
                stopped = true;
                break;
            }

            let timeout = Duration::from_millis(options.timeout_ms);
            let probes = batch.into_iter().map(|ip| probe_host(ip, timeout));
            let results = futures::future::join_all(probes).await;

            for result in results {
                scanned += 1;
                let percent = (scanned * 100 / total.max(1)) as u64;
                if let Some(rtt_ms) = result.rtt_ms {
                    self.broadcaster
                        .publish(
                            "scan_progress",
                            json!({"percent": percent, "ip": result.ip.to_string(), "result": "alive"}),
                        )
                        .await;

                    let ports = if options.include_ports {
                        Some(scan_ports(result.ip, Duration::from_millis(1000)).await)
                    } else {
                        None
                    };

                    self.broadcaster
                        .publish(
                            "host_discovered",
                            json!({"ip": result.ip.to_string(), "rtt_ms": rtt_ms, "ports": ports}),
                        )
                        .await;

                    discovered.push(DiscoveredHost {
                        ip: result.ip,
                        rtt_ms: Some(rtt_ms),
                        ports,
                    });
                } else {
                    self.broadcaster
                        .publish(
                            "scan_progress",
                            json!({"percent": percent, "ip": result.ip.to_string(), "result": "no_response"}),
                        )
                        .await;
                }
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let duration_ms = start.elapsed().as_millis() as i64;

        if stopped {
            *self.state.write().await = ScanState::IdleStopped;
            self.broadcaster.publish("scan_stopped", json!({"range": range})).await;
            warn!(range, scanned, total, "scan stopped before completion");
        } else {
            *self.state.write().await = ScanState::IdleCompleted;
            self.broadcaster
                .publish(
                    "scan_completed",
                    json!({"range": range, "total_scanned": scanned, "total_found": discovered.len()}),
                )
                .await;
            info!(range, scanned, found = discovered.len(), "scan completed");
        }

        Ok(ScanSummary {
            range: range.to_string(),
            total_scanned: scanned,
            discovered,
            duration_ms,
        })
    }
}

/// Single-host liveness check (ICMP, falling back to a TCP connect),
/// independent of a full range sweep. Used by the `ping host` control
/// surface operation.
pub async fn ping(ip: Ipv4Addr, timeout: Duration) -> Option<u64> {
    probe_host(ip, timeout).await.rtt_ms
}

/// Single-host port scan against the well-known target list, independent of
/// a full range sweep. Used by the `port-scan host` control surface
/// operation.
pub async fn port_scan(ip: Ipv4Addr, per_port_timeout: Duration) -> Vec<u16> {
    scan_ports(ip, per_port_timeout).await
}

struct ProbeResult {
    ip: Ipv4Addr,
    rtt_ms: Option<u64>,
}

/// Liveness check for one host: ICMP echo first, falling back to a TCP
/// connect against port 80 (some hosts/containers block raw ICMP but still
/// answer TCP).
async fn probe_host(ip: Ipv4Addr, timeout: Duration) -> ProbeResult {
    if let Some(rtt) = icmp_probe(ip, timeout).await {
        return ProbeResult { ip, rtt_ms: Some(rtt) };
    }

    let start = std::time::Instant::now();
    if tokio::time::timeout(timeout, TcpStream::connect((ip, 80))).await.is_ok_and(|r| r.is_ok()) {
        return ProbeResult {
            ip,
            rtt_ms: Some(start.elapsed().as_millis() as u64),
        };
    }

    ProbeResult { ip, rtt_ms: None }
}

async fn icmp_probe(ip: Ipv4Addr, timeout: Duration) -> Option<u64> {
    use surge_ping::{Client, Config, PingIdentifier, PingSequence};

    let client = Client::new(&Config::default()).ok()?;
    let payload = [0u8; 32];
    let mut pinger = client
        .pinger(std::net::IpAddr::V4(ip), PingIdentifier(rand_identifier()))
        .await;
    pinger.timeout(timeout);

    let start = std::time::Instant::now();
    match tokio::time::timeout(timeout, pinger.ping(PingSequence(0), &payload)).await {
        Ok(Ok(_)) => Some(start.elapsed().as_millis() as u64),
        _ => None,
    }
}

fn rand_identifier() -> u16 {
    use rand::Rng;
    rand::rng().random()
}

async fn scan_ports(ip: Ipv4Addr, per_port_timeout: Duration) -> Vec<u16> {
    let checks = PORT_TARGETS.iter().map(|&port| async move {
        let ok = tokio::time::timeout(per_port_timeout, TcpStream::connect((ip, port)))
            .await
            .is_ok_and(|r| r.is_ok());
        ok.then_some(port)
    });
    futures::future::join_all(checks).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_host() {
        assert_eq!(parse_range("192.168.1.5").unwrap(), vec![Ipv4Addr::new(192, 168, 1, 5)]);
    }

    #[test]
    fn parses_octet_range_inclusive() {
        let hosts = parse_range("10.0.0.1-3").unwrap();
        assert_eq!(
            hosts,
            vec![
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
            ]
        );
    }

    #[test]
    fn rejects_range_with_end_before_start() {
        assert!(parse_range("10.0.0.10-5").is_err());
    }

    #[test]
    fn parses_slash_24_as_254_usable_hosts() {
        let hosts = parse_range("192.168.1.0/24").unwrap();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
    }

    #[test]
    fn rejects_unsupported_cidr_prefix() {
        assert!(parse_range("10.0.0.0/16").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_range("not-an-ip").is_err());
    }

    #[tokio::test]
    async fn second_scan_while_scanning_is_rejected() {
        let scanner = Scanner::new(Broadcaster::new());
        *scanner.state.write().await = ScanState::Scanning;
        let result = scanner.scan("10.0.0.1", ScanOptions::default()).await;
        assert!(matches!(result, Err(ScanError::Busy)));
    }

    #[tokio::test]
    async fn invalid_range_transitions_to_idle_error() {
        let scanner = Scanner::new(Broadcaster::new());
        let result = scanner.scan("garbage", ScanOptions::default()).await;
        assert!(result.is_err());
        assert_eq!(scanner.state().await, ScanState::IdleError);
    }
}
