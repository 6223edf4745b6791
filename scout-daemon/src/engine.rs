//! The discovery engine: one readiness-driven loop over all bound sockets,
//! interface reconciliation each tick, frame dispatch to the role hooks.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use log::{debug, info};
use scout_core::protocol::{KIND_PRIVATE_INFO, KIND_PROBE};
use scout_core::Reassembler;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::binding::{Binding, Datagram};
use crate::ifaces::{IfaceInfo, InterfaceSource, SystemInterfaces};
use crate::role::Role;

/// Upper bound on one readiness wait, so interface changes and the run
/// timeout are noticed even with no traffic.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Name of the synthetic wildcard binding used in hosting mode.
const WILDCARD_IFACE: &str = "any";

/// Addressing mode, fixed for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One wildcard binding receiving from every interface (responder).
    Hosting,
    /// One binding per qualifying OS interface (requester).
    Enumeration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Stopping,
    Stopped,
}

/// Cooperative cancellation for a running engine.
#[derive(Clone)]
pub struct StopHandle {
    tx: UnboundedSender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(());
    }
}

enum Wake {
    Datagram(Datagram),
    Stop,
    Tick,
}

/// Owns the interface table, the sender buffers, and the role. All mutation
/// happens on the engine's task; reader tasks only forward datagrams.
pub struct Engine {
    mode: Mode,
    port: u16,
    allowed: Option<Vec<String>>,
    source: Box<dyn InterfaceSource>,
    role: Box<dyn Role>,
    table: HashMap<String, Binding>,
    reassembler: Reassembler,
    state: EngineState,
    dgram_tx: UnboundedSender<Datagram>,
    dgram_rx: UnboundedReceiver<Datagram>,
    stop_tx: UnboundedSender<()>,
    stop_rx: UnboundedReceiver<()>,
}

impl Engine {
    pub fn new(
        mode: Mode,
        port: u16,
        allowed: Option<Vec<String>>,
        role: Box<dyn Role>,
    ) -> Engine {
        Self::with_source(mode, port, allowed, role, Box::new(SystemInterfaces))
    }

    /// Engine with an injected interface source; tests fake the host here.
    pub fn with_source(
        mode: Mode,
        port: u16,
        allowed: Option<Vec<String>>,
        role: Box<dyn Role>,
        source: Box<dyn InterfaceSource>,
    ) -> Engine {
        let (dgram_tx, dgram_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        Engine {
            mode,
            port,
            allowed,
            source,
            role,
            table: HashMap::new(),
            reassembler: Reassembler::new(),
            state: EngineState::Running,
            dgram_tx,
            dgram_rx,
            stop_tx,
            stop_rx,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Names of currently bound interfaces.
    pub fn bound_interfaces(&self) -> Vec<String> {
        self.table.keys().cloned().collect()
    }

    /// Local address of a bound interface's socket.
    pub fn local_addr(&self, iface: &str) -> Option<SocketAddr> {
        self.table.get(iface).and_then(|b| b.local_addr().ok())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Run until the stop handle fires or `timeout` elapses (None runs
    /// unbounded). Every bound socket is closed before this returns.
    pub async fn run(&mut self, timeout: Option<Duration>) {
        let start = Instant::now();
        self.state = EngineState::Running;
        while self.state == EngineState::Running {
            self.reconcile();

            let wake = tokio::select! {
                dgram = self.dgram_rx.recv() => match dgram {
                    Some(dgram) => Wake::Datagram(dgram),
                    None => Wake::Tick,
                },
                _ = self.stop_rx.recv() => Wake::Stop,
                _ = tokio::time::sleep(POLL_INTERVAL) => Wake::Tick,
            };
            match wake {
                Wake::Datagram(dgram) => {
                    self.on_datagram(dgram);
                    // Drain whatever else arrived during the wait.
                    while let Ok(dgram) = self.dgram_rx.try_recv() {
                        self.on_datagram(dgram);
                    }
                }
                Wake::Stop => {
                    info!("stop requested");
                    self.state = EngineState::Stopping;
                }
                Wake::Tick => {}
            }

            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    info!("run timeout elapsed");
                    self.state = EngineState::Stopping;
                }
            }
        }
        self.shutdown();
    }

    /// Diff the desired interface set against the bound set and converge:
    /// close bindings whose interface left, open bindings for new interfaces.
    /// Idempotent; a failed open is retried on the next tick.
    fn reconcile(&mut self) {
        let desired = self.desired_interfaces();

        let stale: Vec<String> = self
            .table
            .keys()
            .filter(|name| !desired.iter().any(|i| &i.name == *name))
            .cloned()
            .collect();
        for name in stale {
            info!("interface {} gone, closing", name);
            self.table.remove(&name);
        }

        for info in desired {
            if self.table.contains_key(&info.name) {
                continue;
            }
            let hosting = self.mode == Mode::Hosting;
            match Binding::open(&info, self.port, hosting, self.dgram_tx.clone()) {
                Ok(binding) => {
                    info!(
                        "interface {} bound ({} -> {})",
                        binding.name, binding.local_ip, binding.broadcast
                    );
                    self.role.on_interface_added(&binding);
                    self.table.insert(info.name, binding);
                }
                Err(e) => debug!("open {} failed, retrying next tick: {}", info.name, e),
            }
        }
    }

    /// The set of interfaces that should be bound right now.
    fn desired_interfaces(&mut self) -> Vec<IfaceInfo> {
        match self.mode {
            Mode::Hosting => vec![IfaceInfo {
                name: WILDCARD_IFACE.to_string(),
                ip: Ipv4Addr::UNSPECIFIED,
                broadcast: Ipv4Addr::UNSPECIFIED,
            }],
            Mode::Enumeration => {
                let mut ifaces = self.source.interfaces();
                if let Some(allowed) = &self.allowed {
                    ifaces.retain(|i| allowed.contains(&i.name));
                }
                ifaces
            }
        }
    }

    /// Reassemble one datagram's bytes and dispatch the extracted frames.
    fn on_datagram(&mut self, dgram: Datagram) {
        let frames = self.reassembler.feed(dgram.from.ip(), &dgram.bytes);
        if frames.is_empty() {
            return;
        }
        let Some(binding) = self.table.get(&dgram.iface) else {
            // Raced with interface removal; the reply path is gone anyway.
            debug!(
                "dropping {} frame(s) from {}: {} no longer bound",
                frames.len(),
                dgram.from,
                dgram.iface
            );
            return;
        };
        for frame in frames {
            match frame.kind {
                KIND_PROBE => self.role.on_probe(binding, dgram.from, &frame.payload),
                KIND_PRIVATE_INFO => {} // deprecated, ignored
                _ => self
                    .role
                    .on_peer_discovered(dgram.from, frame.kind, &frame.payload),
            }
        }
    }

    /// Close every binding. Also runs via drop on early exits.
    fn shutdown(&mut self) {
        for (name, _) in self.table.drain() {
            info!("closing {}", name);
        }
        self.state = EngineState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{Discovered, Requester, Responder};
    use scout_core::IdentityRecord;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Interface source backed by a shared list tests mutate between ticks.
    #[derive(Clone)]
    struct FakeHost {
        ifaces: Arc<Mutex<Vec<IfaceInfo>>>,
    }

    impl FakeHost {
        fn new(ifaces: Vec<IfaceInfo>) -> FakeHost {
            FakeHost {
                ifaces: Arc::new(Mutex::new(ifaces)),
            }
        }

        fn set(&self, ifaces: Vec<IfaceInfo>) {
            *self.ifaces.lock().unwrap() = ifaces;
        }
    }

    impl InterfaceSource for FakeHost {
        fn interfaces(&mut self) -> Vec<IfaceInfo> {
            self.ifaces.lock().unwrap().clone()
        }
    }

    fn lo(name: &str) -> IfaceInfo {
        IfaceInfo {
            name: name.to_string(),
            ip: Ipv4Addr::LOCALHOST,
            broadcast: Ipv4Addr::LOCALHOST,
        }
    }

    struct NullRole;
    impl Role for NullRole {}

    #[tokio::test]
    async fn reconcile_binds_new_and_closes_stale() {
        let host = FakeHost::new(vec![lo("eth-test")]);
        let mut engine = Engine::with_source(
            Mode::Enumeration,
            0,
            None,
            Box::new(NullRole),
            Box::new(host.clone()),
        );

        engine.reconcile();
        assert_eq!(engine.bound_interfaces(), vec!["eth-test".to_string()]);

        host.set(vec![]);
        engine.reconcile();
        assert!(engine.bound_interfaces().is_empty());
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let host = FakeHost::new(vec![lo("eth-test")]);
        let mut engine = Engine::with_source(
            Mode::Enumeration,
            0,
            None,
            Box::new(NullRole),
            Box::new(host),
        );
        engine.reconcile();
        let addr = engine.local_addr("eth-test").unwrap();
        engine.reconcile();
        // Same binding survives, not a reopen.
        assert_eq!(engine.local_addr("eth-test").unwrap(), addr);
    }

    #[tokio::test]
    async fn allow_list_filters_interfaces() {
        let host = FakeHost::new(vec![lo("wanted"), lo("other")]);
        let mut engine = Engine::with_source(
            Mode::Enumeration,
            0,
            Some(vec!["wanted".to_string()]),
            Box::new(NullRole),
            Box::new(host),
        );
        engine.reconcile();
        assert_eq!(engine.bound_interfaces(), vec!["wanted".to_string()]);
    }

    #[tokio::test]
    async fn hosting_mode_binds_single_wildcard() {
        let mut engine = Engine::with_source(
            Mode::Hosting,
            0,
            None,
            Box::new(NullRole),
            Box::new(FakeHost::new(vec![])),
        );
        engine.reconcile();
        assert_eq!(engine.bound_interfaces(), vec!["any".to_string()]);
        engine.reconcile();
        assert_eq!(engine.bound_interfaces().len(), 1);
    }

    #[tokio::test]
    async fn run_times_out_and_closes_bindings() {
        let host = FakeHost::new(vec![lo("eth-test")]);
        let mut engine = Engine::with_source(
            Mode::Enumeration,
            0,
            None,
            Box::new(NullRole),
            Box::new(host),
        );
        timeout(
            Duration::from_secs(5),
            engine.run(Some(Duration::from_millis(50))),
        )
        .await
        .unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.bound_interfaces().is_empty());
    }

    #[tokio::test]
    async fn stop_handle_stops_run() {
        let mut engine = Engine::with_source(
            Mode::Enumeration,
            0,
            None,
            Box::new(NullRole),
            Box::new(FakeHost::new(vec![])),
        );
        let stop = engine.stop_handle();
        stop.stop();
        timeout(Duration::from_secs(5), engine.run(None))
            .await
            .unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn probe_and_reply_end_to_end() {
        // Responder hosts the wildcard socket on an ephemeral port.
        let mut responder = Engine::with_source(
            Mode::Hosting,
            0,
            None,
            Box::new(Responder::new(vec![IdentityRecord {
                kind: 3,
                payload: "Living Room".to_string(),
            }])),
            Box::new(FakeHost::new(vec![])),
        );
        responder.reconcile();
        let port = responder.local_addr("any").unwrap().port();
        let stop = responder.stop_handle();
        let responder_task = tokio::spawn(async move {
            responder.run(None).await;
            responder
        });

        // Requester probes through a fake interface whose broadcast address
        // is loopback, landing on the responder's port.
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<Discovered>();
        let mut requester = Engine::with_source(
            Mode::Enumeration,
            port,
            None,
            Box::new(Requester::new(Some(report_tx))),
            Box::new(FakeHost::new(vec![lo("lo-e2e")])),
        );
        let requester_stop = requester.stop_handle();
        let requester_task = tokio::spawn(async move {
            requester.run(None).await;
        });

        let peer = timeout(Duration::from_secs(5), report_rx.recv())
            .await
            .expect("discovery timed out")
            .unwrap();
        assert_eq!(peer.kind, 3);
        assert_eq!(peer.payload, "Living Room");

        stop.stop();
        requester_stop.stop();
        let responder = responder_task.await.unwrap();
        assert_eq!(responder.state(), EngineState::Stopped);
        requester_task.await.unwrap();
    }
}
