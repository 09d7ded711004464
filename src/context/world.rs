//! Pool context: a bounded set of PAs over shared infrastructure.
//!
//! A [`WorldContext`] starts (or adopts) one transport and one lookup
//! service, then starts its PAs against them. PAs borrow the shared
//! transport unless the world is configured for private transports.
//! Shared infrastructure starts before any PA and stops only after every
//! PA has stopped, and only if the world created it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use super::info::WorldInfo;
use super::pa::{PaConfig, PaContext};
use super::teardown::TeardownReport;
use crate::config::{DEFAULT_PA_COUNT, MAX_PA_COUNT, MIN_PA_COUNT, TransportConfig, validate_pa_count};
use crate::error::HarnessError;
use crate::lookup::LookupService;
use crate::service::ManagedService;
use crate::transport::TransportService;

/// How to build a world.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// PAs started on `start`.
    pub pa_count: usize,
    /// Template for every PA; names are assigned `pa1`, `pa2`, …
    pub pa: PaConfig,
    /// The shared transport (and private ones, when enabled).
    pub transport: TransportConfig,
    /// Give every PA its own transport instead of the shared one.
    pub private_transport: bool,
}

impl WorldConfig {
    /// A world of `pa_count` PAs with the given readiness deadline.
    #[must_use]
    pub fn new(pa_count: usize, ready_timeout: Duration) -> Self {
        Self {
            pa_count,
            pa: PaConfig::new(ready_timeout),
            transport: TransportConfig::default(),
            private_transport: false,
        }
    }

    /// One PA with the given readiness deadline.
    #[must_use]
    pub fn single(ready_timeout: Duration) -> Self {
        Self::new(DEFAULT_PA_COUNT, ready_timeout)
    }

    /// Sets the PA template.
    #[must_use]
    pub fn with_pa(mut self, pa: PaConfig) -> Self {
        self.pa = pa;
        self
    }

    /// Sets the rank every PA reports.
    #[must_use]
    pub fn with_rank(mut self, rank: impl Into<String>) -> Self {
        self.pa.rank = rank.into();
        self
    }

    /// Sets the transport configuration.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Gives every PA its own transport.
    #[must_use]
    pub const fn with_private_transport(mut self, private: bool) -> Self {
        self.private_transport = private;
        self
    }
}

/// A bounded pool of PAs sharing infrastructure.
#[derive(Debug)]
pub struct WorldContext {
    config: WorldConfig,
    transport: Arc<TransportService>,
    owns_transport: bool,
    lookup: Arc<LookupService>,
    owns_lookup: bool,
    pas: Vec<PaContext>,
    running: bool,
    stopped: bool,
}

impl WorldContext {
    /// Validates the configuration; nothing is started yet.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::PoolSizeOutOfRange`] if `pa_count` is
    /// outside `1..=10`, and [`HarnessError::Validation`] if private
    /// transports are requested with an external broker or a fixed port,
    /// since every PA would then claim the same endpoint. No child context
    /// is created in either case.
    pub fn new(config: WorldConfig) -> Result<Self, HarnessError> {
        validate_pa_count(config.pa_count)?;
        if config.private_transport {
            if let Some(endpoint) = &config.transport.external {
                return Err(HarnessError::Validation(format!(
                    "private transports cannot share the external broker {}",
                    endpoint.url()
                )));
            }
            if config.transport.port != 0 {
                return Err(HarnessError::Validation(format!(
                    "private transports need an ephemeral port, got {}",
                    config.transport.port
                )));
            }
        }
        let transport = Arc::new(
            TransportService::from_config(&config.transport).with_name("world-transport"),
        );
        Ok(Self {
            config,
            transport,
            owns_transport: true,
            lookup: Arc::new(LookupService::mock()),
            owns_lookup: true,
            pas: Vec::new(),
            running: false,
            stopped: false,
        })
    }

    /// Adopts an already running transport. The world never stops it.
    #[must_use]
    pub fn with_shared_transport(mut self, transport: Arc<TransportService>) -> Self {
        self.transport = transport;
        self.owns_transport = false;
        self
    }

    /// Adopts an already running lookup service. The world never stops it.
    #[must_use]
    pub fn with_lookup(mut self, lookup: Arc<LookupService>) -> Self {
        self.lookup = lookup;
        self.owns_lookup = false;
        self
    }

    /// Shared transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<TransportService> {
        &self.transport
    }

    /// Shared lookup service.
    #[must_use]
    pub const fn lookup(&self) -> &Arc<LookupService> {
        &self.lookup
    }

    /// Every PA, in creation order.
    #[must_use]
    pub fn pas(&self) -> &[PaContext] {
        &self.pas
    }

    /// The PA at `index` (0-based).
    #[must_use]
    pub fn pa(&self, index: usize) -> Option<&PaContext> {
        self.pas.get(index)
    }

    /// Mutable access to the PA at `index`, e.g. for its observer.
    pub fn pa_mut(&mut self, index: usize) -> Option<&mut PaContext> {
        self.pas.get_mut(index)
    }

    /// Number of PAs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pas.len()
    }

    /// Returns `true` if the world has no PAs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pas.is_empty()
    }

    /// Returns `true` between a successful `start` and `shutdown`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Read-only snapshot.
    pub async fn info(&self) -> WorldInfo {
        WorldInfo {
            transport: self.transport.info(),
            lookup: self.lookup.info().await,
            pas: self.pas.iter().map(PaContext::info).collect(),
            is_running: self.running,
        }
    }

    /// Starts the shared infrastructure, then the configured PAs.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::AlreadyRunning`] on a second call,
    /// [`HarnessError::Validation`] once the world has been shut down,
    /// [`HarnessError::NotStarted`] if adopted infrastructure is not
    /// running, and the first failure of any PA. Everything started before
    /// a failure is torn down.
    pub async fn start(&mut self) -> Result<(), HarnessError> {
        if self.running {
            return Err(HarnessError::AlreadyRunning("world".to_string()));
        }
        if self.stopped {
            return Err(HarnessError::Validation(
                "world cannot be restarted after shutdown".to_string(),
            ));
        }
        tracing::info!(
            pa_count = self.config.pa_count,
            private_transport = self.config.private_transport,
            "starting world"
        );

        if let Err(e) = self.start_shared().await {
            let report = self.stop_shared().await;
            if !report.is_clean() {
                tracing::warn!(%report, "teardown after failed world startup");
            }
            return Err(e);
        }
        self.running = true;

        if let Err(e) = self.add_pas(self.config.pa_count).await {
            let report = self.shutdown().await;
            if !report.is_clean() {
                tracing::warn!(%report, "teardown after failed world startup");
            }
            return Err(e);
        }
        tracing::info!(pas = self.pas.len(), "world running");
        Ok(())
    }

    async fn start_shared(&mut self) -> Result<(), HarnessError> {
        if self.owns_transport {
            self.transport.start().await?;
        } else if !self.transport.is_running() {
            return Err(HarnessError::NotStarted(self.transport.name().to_string()));
        }
        if self.owns_lookup {
            self.lookup.start().await?;
        } else if !self.lookup.is_running() {
            return Err(HarnessError::NotStarted(self.lookup.name().to_string()));
        }
        Ok(())
    }

    /// Adds `n` PAs to a running world and returns the new ones.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NotStarted`] if the world is not running,
    /// [`HarnessError::PoolSizeOutOfRange`] if `n` is zero or the world
    /// would exceed 10 PAs, [`HarnessError::PortConflict`] if a new PA
    /// shares a port with another one, and any PA startup failure. New PAs
    /// that did start are torn down on failure; existing ones are kept.
    pub async fn pa_new(&mut self, n: usize) -> Result<&[PaContext], HarnessError> {
        if !self.running {
            return Err(HarnessError::NotStarted("world".to_string()));
        }
        let before = self.pas.len();
        self.add_pas(n).await?;
        Ok(self.pas.get(before..).unwrap_or_default())
    }

    async fn add_pas(&mut self, n: usize) -> Result<(), HarnessError> {
        let total = self.pas.len().saturating_add(n);
        if n < MIN_PA_COUNT || total > MAX_PA_COUNT {
            return Err(HarnessError::PoolSizeOutOfRange {
                requested: total,
                min: MIN_PA_COUNT,
                max: MAX_PA_COUNT,
            });
        }

        let first = self.pas.len() + 1;
        let mut fresh: Vec<PaContext> = (first..first + n).map(|i| self.make_pa(i)).collect();

        let results = join_all(fresh.iter_mut().map(PaContext::start)).await;
        let failure = results.into_iter().find_map(Result::err);
        let failure = match failure {
            Some(e) => Some(e),
            None => self.check_ports(&fresh).err(),
        };
        if let Some(e) = failure {
            let reports = join_all(fresh.iter_mut().map(PaContext::shutdown)).await;
            for report in reports.into_iter().filter(|r| !r.is_clean()) {
                tracing::warn!(%report, "teardown of partially started PAs");
            }
            return Err(e);
        }

        tracing::info!(added = n, total = total, "PAs added to world");
        self.pas.extend(fresh);
        Ok(())
    }

    fn make_pa(&self, index: usize) -> PaContext {
        let config = self.config.pa.clone().with_name(format!("pa{index}"));
        let pa = if self.config.private_transport {
            PaContext::new(config.with_transport(self.config.transport.clone()))
        } else {
            PaContext::with_transport(config, Arc::clone(&self.transport))
        };
        pa.with_lookup(Arc::clone(&self.lookup))
    }

    /// Checks that gateway ports and embedded private transport ports are
    /// pairwise distinct across all PAs.
    fn check_ports(&self, fresh: &[PaContext]) -> Result<(), HarnessError> {
        let mut seen: HashMap<u16, &str> = HashMap::new();
        for pa in self.pas.iter().chain(fresh) {
            let transport_port = (pa.owns_transport() && pa.transport().is_local())
                .then(|| pa.transport_port())
                .flatten();
            for port in pa.api_port().into_iter().chain(transport_port) {
                if let Some(owner) = seen.insert(port, pa.name()) {
                    return Err(HarnessError::PortConflict {
                        port,
                        owner: owner.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Stops every PA concurrently, then the shared infrastructure it owns.
    ///
    /// PAs stay in the list so their final state can be inspected, and the
    /// world cannot be started again.
    pub async fn shutdown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::new();
        for pa_report in join_all(self.pas.iter_mut().map(PaContext::shutdown)).await {
            report.merge(pa_report);
        }
        report.merge(self.stop_shared().await);
        if self.running {
            tracing::info!(clean = report.is_clean(), "world stopped");
            self.stopped = true;
        }
        self.running = false;
        report
    }

    async fn stop_shared(&mut self) -> TeardownReport {
        let mut report = TeardownReport::new();
        if self.owns_lookup {
            report.record("world/lookup", self.lookup.stop().await);
        }
        if self.owns_transport {
            report.record("world/transport", self.transport.stop().await);
        }
        report
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::TransportEndpoint;
    use crate::transport::BrokerOptions;

    const READY: Duration = Duration::from_secs(5);

    #[test]
    fn out_of_range_counts_fail_before_anything_exists() {
        for count in [0, 11] {
            let result = WorldContext::new(WorldConfig::new(count, READY));
            assert!(
                matches!(result, Err(HarnessError::PoolSizeOutOfRange { requested, .. }) if requested == count)
            );
        }
        assert!(WorldContext::new(WorldConfig::new(10, READY)).is_ok());
    }

    #[tokio::test]
    async fn pas_share_the_world_transport() {
        let Ok(mut world) = WorldContext::new(WorldConfig::new(2, READY)) else {
            panic!("config");
        };
        let Ok(()) = world.start().await else {
            panic!("start failed");
        };
        assert_eq!(world.len(), 2);
        for pa in world.pas() {
            assert!(Arc::ptr_eq(pa.transport(), world.transport()));
            assert!(!pa.owns_transport());
        }
        assert_eq!(world.pa(0).map(PaContext::name), Some("pa1"));
        assert_eq!(world.pa(1).map(PaContext::name), Some("pa2"));

        let report = world.shutdown().await;
        assert!(report.is_clean(), "{report}");
        assert!(!world.transport().is_running());
        assert!(!world.lookup().is_running());
        assert!(world.pas().iter().all(|pa| !pa.is_running()));
    }

    #[tokio::test]
    async fn private_transports_get_distinct_ports() {
        let config = WorldConfig::new(3, READY).with_private_transport(true);
        let Ok(mut world) = WorldContext::new(config) else {
            panic!("config");
        };
        let Ok(()) = world.start().await else {
            panic!("start failed");
        };
        let mut ports: Vec<u16> = world.pas().iter().filter_map(PaContext::transport_port).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 3);
        assert!(world.pas().iter().all(PaContext::owns_transport));
        let _ = world.shutdown().await;
    }

    #[tokio::test]
    async fn pa_new_grows_up_to_the_bound() {
        let Ok(mut world) = WorldContext::new(WorldConfig::single(READY)) else {
            panic!("config");
        };
        assert!(matches!(
            world.pa_new(1).await,
            Err(HarnessError::NotStarted(_))
        ));
        let Ok(()) = world.start().await else {
            panic!("start failed");
        };

        let Ok(added) = world.pa_new(2).await else {
            panic!("pa_new failed");
        };
        assert_eq!(added.len(), 2);
        assert_eq!(world.len(), 3);
        assert!(matches!(
            world.pa_new(0).await,
            Err(HarnessError::PoolSizeOutOfRange { .. })
        ));
        assert!(matches!(
            world.pa_new(8).await,
            Err(HarnessError::PoolSizeOutOfRange { requested: 11, .. })
        ));
        assert_eq!(world.len(), 3);
        let _ = world.shutdown().await;
    }

    #[tokio::test]
    async fn adopted_infrastructure_is_left_running() {
        let transport = Arc::new(TransportService::embedded(BrokerOptions::default()));
        let lookup = Arc::new(LookupService::mock());
        assert!(transport.start().await.is_ok());
        assert!(lookup.start().await.is_ok());

        let Ok(world) = WorldContext::new(WorldConfig::single(READY)) else {
            panic!("config");
        };
        let mut world = world
            .with_shared_transport(Arc::clone(&transport))
            .with_lookup(Arc::clone(&lookup));
        let Ok(()) = world.start().await else {
            panic!("start failed");
        };
        assert!(Arc::ptr_eq(world.lookup(), &lookup));
        let report = world.shutdown().await;
        assert!(report.is_clean(), "{report}");
        assert!(transport.is_running());
        assert!(lookup.is_running());
        let _ = transport.stop().await;
    }

    #[tokio::test]
    async fn adopted_infrastructure_must_be_running() {
        let Ok(world) = WorldContext::new(WorldConfig::single(READY)) else {
            panic!("config");
        };
        let mut world = world.with_lookup(Arc::new(LookupService::mock()));
        assert!(matches!(world.start().await, Err(HarnessError::NotStarted(_))));
        assert!(world.is_empty());
        assert!(!world.transport().is_running(), "owned transport released");
    }

    #[tokio::test]
    async fn info_lists_every_pa() {
        let Ok(mut world) = WorldContext::new(WorldConfig::new(2, READY)) else {
            panic!("config");
        };
        let Ok(()) = world.start().await else {
            panic!("start failed");
        };
        let info = world.info().await;
        assert!(info.is_running);
        assert!(info.transport.is_running);
        assert!(info.lookup.is_running);
        assert_eq!(info.pas.len(), 2);
        assert!(info.pas.iter().all(|pa| pa.is_running && !pa.owns_transport));
        assert!(info.pas.iter().all(|pa| pa.runners.len() == 3), "routing worker included");
        let _ = world.shutdown().await;
    }

    #[test]
    fn private_transports_reject_a_single_endpoint() {
        let external = TransportConfig::external(TransportEndpoint::new("127.0.0.1", 4222));
        let config = WorldConfig::new(2, READY)
            .with_transport(external)
            .with_private_transport(true);
        assert!(matches!(
            WorldContext::new(config),
            Err(HarnessError::Validation(_))
        ));

        let fixed = TransportConfig {
            port: 4222,
            ..TransportConfig::default()
        };
        let config = WorldConfig::new(2, READY)
            .with_transport(fixed)
            .with_private_transport(true);
        assert!(matches!(
            WorldContext::new(config),
            Err(HarnessError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn shared_external_transport_is_accepted() {
        let owner = Arc::new(TransportService::embedded(BrokerOptions::default()));
        let Ok(()) = owner.start().await else {
            panic!("transport start failed");
        };
        let Some(endpoint) = owner.address() else {
            panic!("endpoint");
        };
        let config = WorldConfig::new(2, READY).with_transport(TransportConfig::external(endpoint));
        let Ok(mut world) = WorldContext::new(config) else {
            panic!("config");
        };
        let Ok(()) = world.start().await else {
            panic!("start failed");
        };
        assert!(!world.transport().is_local());
        assert!(world.shutdown().await.is_clean());
        assert!(owner.is_running(), "external broker is never stopped");
        let _ = owner.stop().await;
    }

    #[tokio::test]
    async fn stopped_world_cannot_restart() {
        let Ok(mut world) = WorldContext::new(WorldConfig::new(2, READY)) else {
            panic!("config");
        };
        let Ok(()) = world.start().await else {
            panic!("start failed");
        };
        let _ = world.shutdown().await;
        assert!(matches!(world.start().await, Err(HarnessError::Validation(_))));
        assert_eq!(world.len(), 2);
        assert!(!world.transport().is_running());
    }
}
