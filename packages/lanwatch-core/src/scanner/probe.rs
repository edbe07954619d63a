//! Per-host probe pipeline.
//!
//! For each IP: ARP lookup, reachability (ICMP then TCP fallback), and for
//! live or ARP-known hosts hostname, port scan, banners, vendor and OS.
//! Every network step is individually time-bounded and the cancellation
//! token is checked between steps.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{self, FutureExt};
use tokio_util::sync::CancellationToken;

use super::arp::{self, ArpTable};
use super::fingerprint::{self, Signals};
use super::oui::OuiDb;
use super::{hostname, ping, ports};
use crate::config::ScanConfig;
use crate::model::{Device, now_ms};
use crate::resilience::RetryPolicy;

/// Network I/O used by the pipeline. Tests substitute a scripted prober.
#[async_trait]
pub trait HostProber: Send + Sync {
    /// `Ok(false)` for no answer, `Err` when ICMP is unavailable.
    async fn icmp_reachable(&self, ip: Ipv4Addr, timeout: Duration) -> io::Result<bool>;

    async fn tcp_connect(&self, ip: Ipv4Addr, port: u16, timeout: Duration) -> io::Result<()>;

    async fn reverse_lookup(&self, ip: Ipv4Addr) -> Option<String>;

    async fn grab_banner(&self, ip: Ipv4Addr, port: u16, timeout: Duration) -> Option<String>;

    /// Snapshot of the neighbor table, read once per scan.
    async fn neighbor_table(&self) -> ArpTable;
}

/// Prober backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProber;

#[async_trait]
impl HostProber for SystemProber {
    async fn icmp_reachable(&self, ip: Ipv4Addr, timeout: Duration) -> io::Result<bool> {
        ping::icmp_ping(ip, timeout).await
    }

    async fn tcp_connect(&self, ip: Ipv4Addr, port: u16, timeout: Duration) -> io::Result<()> {
        ping::tcp_connect(ip, port, timeout).await.map(|_| ())
    }

    async fn reverse_lookup(&self, ip: Ipv4Addr) -> Option<String> {
        hostname::reverse_lookup(ip).await
    }

    async fn grab_banner(&self, ip: Ipv4Addr, port: u16, timeout: Duration) -> Option<String> {
        ports::grab_banner(ip, port, timeout).await
    }

    async fn neighbor_table(&self) -> ArpTable {
        arp::read_arp_table().await
    }
}

/// Per-step time bounds and port lists.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub reachability_timeout: Duration,
    pub port_scan_timeout: Duration,
    pub banner_timeout: Duration,
    pub hostname_timeout: Duration,
    pub probe_ports: Vec<u16>,
    pub scan_ports: Vec<u16>,
}

impl ProbeSettings {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            reachability_timeout: config.reachability_timeout(),
            port_scan_timeout: config.port_scan_timeout(),
            banner_timeout: config.banner_timeout(),
            hostname_timeout: config.hostname_timeout(),
            probe_ports: config.probe_ports.clone(),
            scan_ports: ports::SAFE_PORTS.to_vec(),
        }
    }

    /// Apply a per-request connect timeout to the TCP steps.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.port_scan_timeout = timeout;
        self.reachability_timeout = timeout.max(self.reachability_timeout);
        self
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// Reachable or ARP-known; `online` reflects reachability.
    Found(Device),
    /// Neither reachable nor in the ARP table.
    Dark,
    /// The generation was cancelled before the probe finished.
    Cancelled,
}

#[derive(Clone)]
pub struct ProbePipeline {
    prober: Arc<dyn HostProber>,
    oui: Arc<OuiDb>,
    retry: RetryPolicy,
    settings: ProbeSettings,
}

impl ProbePipeline {
    pub fn new(
        prober: Arc<dyn HostProber>,
        oui: Arc<OuiDb>,
        retry: RetryPolicy,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            prober,
            oui,
            retry,
            settings,
        }
    }

    pub async fn read_neighbors(&self) -> ArpTable {
        self.prober.neighbor_table().await
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Same pipeline with different step settings.
    pub fn with_settings(&self, settings: ProbeSettings) -> Self {
        Self {
            settings,
            ..self.clone()
        }
    }

    pub async fn probe(&self, ip: Ipv4Addr, arp: &ArpTable, cancel: &CancellationToken) -> ProbeOutcome {
        let mac = arp.mac_for(ip).map(str::to_string);

        if cancel.is_cancelled() {
            return ProbeOutcome::Cancelled;
        }
        let reachable = self.reachable(ip).await;

        if !reachable && mac.is_none() {
            return ProbeOutcome::Dark;
        }
        if cancel.is_cancelled() {
            return ProbeOutcome::Cancelled;
        }

        let hostname = tokio::time::timeout(self.settings.hostname_timeout, self.prober.reverse_lookup(ip))
            .await
            .ok()
            .flatten()
            .and_then(|name| hostname::sanitize_hostname(&name, &ip.to_string()));

        if cancel.is_cancelled() {
            return ProbeOutcome::Cancelled;
        }
        let open_ports = if reachable {
            self.scan_ports(ip).await
        } else {
            BTreeSet::new()
        };

        if cancel.is_cancelled() {
            return ProbeOutcome::Cancelled;
        }
        let banners = self.grab_banners(ip, &open_ports).await;

        let vendor = mac.as_deref().and_then(|m| self.oui.lookup(m));

        let signals = Signals {
            open_ports: &open_ports,
            banners: &banners,
            hostname: hostname.as_deref(),
            vendor: vendor.as_deref(),
            mac: mac.as_deref(),
        };
        let os = fingerprint::infer_os(&signals);
        let device_type = fingerprint::infer_device_type(&signals, os);

        let mut device = Device::observed(ip.to_string(), mac);
        device.online = reachable;
        if reachable {
            device.last_seen = now_ms();
        }
        device.hostname = hostname;
        device.vendor = vendor;
        device.os = os.map(str::to_string);
        device.device_type = device_type;
        device.open_ports = open_ports;
        device.banners = banners;

        tracing::debug!(
            "Probed {}: online={} ports={:?} os={:?}",
            ip,
            device.online,
            device.open_ports,
            device.os
        );
        ProbeOutcome::Found(device)
    }

    /// ICMP first; when it fails or is unavailable, TCP connects to the
    /// fallback ports race and the first success wins.
    async fn reachable(&self, ip: Ipv4Addr) -> bool {
        match self
            .prober
            .icmp_reachable(ip, self.settings.reachability_timeout)
            .await
        {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => tracing::debug!("ICMP unavailable for {}: {}", ip, e),
        }

        if self.settings.probe_ports.is_empty() {
            return false;
        }

        let attempts = self.settings.probe_ports.iter().map(|&port| {
            let timeout = self.settings.reachability_timeout;
            async move {
                self.retry
                    .execute("tcp reachability", || self.prober.tcp_connect(ip, port, timeout))
                    .await
            }
            .boxed()
        });

        future::select_ok(attempts).await.is_ok()
    }

    async fn scan_ports(&self, ip: Ipv4Addr) -> BTreeSet<u16> {
        let timeout = self.settings.port_scan_timeout;
        let checks = self.settings.scan_ports.iter().map(|&port| async move {
            let result = self
                .retry
                .execute("port scan", || self.prober.tcp_connect(ip, port, timeout))
                .await;
            result.ok().map(|_| port)
        });
        future::join_all(checks).await.into_iter().flatten().collect()
    }

    async fn grab_banners(&self, ip: Ipv4Addr, open_ports: &BTreeSet<u16>) -> BTreeMap<u16, String> {
        let timeout = self.settings.banner_timeout;
        let reads = open_ports.iter().map(|&port| async move {
            self.prober
                .grab_banner(ip, port, timeout)
                .await
                .map(|banner| (port, banner))
        });
        future::join_all(reads).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted prober shared by pipeline and coordinator tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Default)]
    pub struct FakeHost {
        pub icmp: bool,
        pub open_ports: Vec<u16>,
        pub banners: HashMap<u16, String>,
        pub hostname: Option<String>,
    }

    #[derive(Default)]
    pub struct FakeProber {
        pub hosts: HashMap<Ipv4Addr, FakeHost>,
        /// Artificial latency per ICMP probe
        pub delay: Duration,
        pub icmp_unavailable: bool,
        pub arp: ArpTable,
        pub probed: Mutex<Vec<Ipv4Addr>>,
    }

    impl FakeProber {
        pub fn with_host(mut self, ip: Ipv4Addr, host: FakeHost) -> Self {
            self.hosts.insert(ip, host);
            self
        }
    }

    #[async_trait]
    impl HostProber for FakeProber {
        async fn icmp_reachable(&self, ip: Ipv4Addr, _timeout: Duration) -> io::Result<bool> {
            self.probed.lock().push(ip);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.icmp_unavailable {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            Ok(self.hosts.get(&ip).is_some_and(|h| h.icmp))
        }

        async fn tcp_connect(&self, ip: Ipv4Addr, port: u16, _timeout: Duration) -> io::Result<()> {
            match self.hosts.get(&ip) {
                Some(host) if host.open_ports.contains(&port) => Ok(()),
                Some(_) => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
                None => Err(io::Error::from(io::ErrorKind::TimedOut)),
            }
        }

        async fn reverse_lookup(&self, ip: Ipv4Addr) -> Option<String> {
            self.hosts.get(&ip).and_then(|h| h.hostname.clone())
        }

        async fn grab_banner(&self, ip: Ipv4Addr, port: u16, _timeout: Duration) -> Option<String> {
            self.hosts.get(&ip).and_then(|h| h.banners.get(&port).cloned())
        }

        async fn neighbor_table(&self) -> ArpTable {
            self.arp.clone()
        }
    }

    pub fn pipeline(prober: FakeProber) -> ProbePipeline {
        ProbePipeline::new(
            Arc::new(prober),
            Arc::new(OuiDb::default()),
            RetryPolicy::no_retry(),
            ProbeSettings::default(),
        )
    }
}
