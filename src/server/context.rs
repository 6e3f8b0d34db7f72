/*!
 * Server Context
 * One explicit context owning every registry and manager
 *
 * Built exactly once at startup, before any thread exists, and passed by
 * reference to every component. Nothing in the daemon is a singleton.
 */

use log::info;
use std::path::PathBuf;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::dispatcher::Dispatcher;
use super::ingress::IngressShared;
use super::listener::Listener;
use crate::applier::{Applier, DefaultApplier};
use crate::client::gc::GarbageCollector;
use crate::client::manager::ClientDataManager;
use crate::client::pulse::{GcQueue, LivenessProbe, ProcLiveness, PulseMonitor};
use crate::client::rate_limiter::RateLimiter;
use crate::coco::table::CocoTable;
use crate::core::errors::Result;
use crate::core::timer::TimerWheel;
use crate::core::types::modes;
use crate::registry::app::AppRegistry;
use crate::registry::properties::{PropertiesRegistry, Tunables};
use crate::registry::resource::ResourceRegistry;
use crate::registry::signal::SignalRegistry;
use crate::registry::target::TargetRegistry;
use crate::request::manager::RequestManager;
use crate::request::queue::{Message, RequestQueue};

pub struct ServerBuilder {
    targets: Arc<TargetRegistry>,
    resources: Option<ResourceRegistry>,
    signals: SignalRegistry,
    apps: AppRegistry,
    properties: PropertiesRegistry,
    applier: Option<Arc<dyn Applier>>,
    probe: Option<Arc<dyn LivenessProbe>>,
    tunables: Option<Tunables>,
    socket_path: Option<PathBuf>,
    ingress_workers: usize,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            targets: Arc::new(TargetRegistry::default()),
            resources: None,
            signals: SignalRegistry::new(),
            apps: AppRegistry::new(),
            properties: PropertiesRegistry::new(),
            applier: None,
            probe: None,
            tunables: None,
            socket_path: None,
            ingress_workers: 4,
        }
    }

    pub fn targets(mut self, targets: Arc<TargetRegistry>) -> Self {
        self.targets = targets;
        self
    }

    pub fn resources(mut self, resources: ResourceRegistry) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn signals(mut self, signals: SignalRegistry) -> Self {
        self.signals = signals;
        self
    }

    pub fn apps(mut self, apps: AppRegistry) -> Self {
        self.apps = apps;
        self
    }

    pub fn properties(mut self, properties: PropertiesRegistry) -> Self {
        self.properties = properties;
        self
    }

    /// Override the OS-writing side-effect boundary (tests record instead)
    pub fn applier(mut self, applier: Arc<dyn Applier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn liveness_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Override the property-derived tunables (tests shrink the periods)
    pub fn tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = Some(tunables);
        self
    }

    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn ingress_workers(mut self, workers: usize) -> Self {
        self.ingress_workers = workers.max(1);
        self
    }

    pub fn build(self) -> Server {
        let resources = Arc::new(
            self.resources
                .unwrap_or_else(|| ResourceRegistry::new(Arc::clone(&self.targets))),
        );
        let properties = Arc::new(self.properties);
        let tunables = self.tunables.unwrap_or_else(|| properties.tunables());
        let applier: Arc<dyn Applier> = self
            .applier
            .unwrap_or_else(|| Arc::new(DefaultApplier::new(Arc::clone(&self.targets))));
        let probe: Arc<dyn LivenessProbe> = self.probe.unwrap_or_else(|| Arc::new(ProcLiveness));

        Server {
            targets: self.targets,
            resources,
            signals: Arc::new(self.signals),
            apps: Arc::new(self.apps),
            properties,
            tunables,
            applier,
            probe,
            socket_path: self.socket_path,
            ingress_workers: self.ingress_workers,
            cdm: Arc::new(ClientDataManager::new()),
            requests: Arc::new(RequestManager::new()),
            queue: None,
            wheel: None,
            shared: None,
            dispatcher: None,
            pulse: None,
            gc: None,
            listener: None,
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The daemon: registries, managers, and (once started) its threads
pub struct Server {
    targets: Arc<TargetRegistry>,
    resources: Arc<ResourceRegistry>,
    signals: Arc<SignalRegistry>,
    apps: Arc<AppRegistry>,
    properties: Arc<PropertiesRegistry>,
    tunables: Tunables,
    applier: Arc<dyn Applier>,
    probe: Arc<dyn LivenessProbe>,
    socket_path: Option<PathBuf>,
    ingress_workers: usize,

    cdm: Arc<ClientDataManager>,
    requests: Arc<RequestManager>,

    queue: Option<Arc<RequestQueue>>,
    wheel: Option<Arc<TimerWheel>>,
    shared: Option<Arc<IngressShared>>,
    dispatcher: Option<JoinHandle<()>>,
    pulse: Option<PulseMonitor>,
    gc: Option<GarbageCollector>,
    listener: Option<Listener>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Spawn the dispatcher, timer wheel, pulse/GC daemons, and (when a
    /// socket path is configured) the listener.
    pub fn start(&mut self) -> Result<()> {
        info!(
            "starting: {} resources, {} signals, {} scope slots",
            self.resources.len(),
            self.signals.len(),
            self.resources.total_scopes()
        );
        self.resources.display();

        let queue = Arc::new(RequestQueue::new(self.tunables.queue_capacity));
        self.queue = Some(Arc::clone(&queue));

        // Timers never mutate coordinator state: they post expire messages
        let expire_queue = Arc::clone(&queue);
        let wheel = Arc::new(TimerWheel::start(move |handle| {
            expire_queue.push_internal(Message::Expire { handle });
        }));
        self.wheel = Some(Arc::clone(&wheel));

        let coco = CocoTable::new(Arc::clone(&self.resources), Arc::clone(&self.applier));
        let dispatcher = Dispatcher::new(
            coco,
            Arc::clone(&queue),
            Arc::clone(&self.requests),
            Arc::clone(&self.cdm),
            Arc::clone(&wheel),
            Arc::clone(&self.resources),
        );
        self.dispatcher = Some(
            thread::Builder::new()
                .name("restune-dispatch".into())
                .spawn(move || dispatcher.run())
                .expect("failed to spawn dispatcher"),
        );

        let gc_queue = Arc::new(GcQueue::new());
        self.pulse = Some(PulseMonitor::start(
            Arc::clone(&self.cdm),
            Arc::clone(&self.probe),
            Arc::clone(&gc_queue),
            self.tunables.pulse_duration,
        ));
        self.gc = Some(GarbageCollector::start(
            Arc::clone(&self.cdm),
            gc_queue,
            Arc::clone(&queue),
            self.tunables.gc_batch,
            self.tunables.gc_duration,
        ));

        let shared = Arc::new(IngressShared {
            cdm: Arc::clone(&self.cdm),
            limiter: RateLimiter::new(&self.tunables),
            queue,
            requests: Arc::clone(&self.requests),
            resources: Arc::clone(&self.resources),
            signals: Arc::clone(&self.signals),
            apps: Arc::clone(&self.apps),
            properties: Arc::clone(&self.properties),
            tunables: self.tunables.clone(),
            current_mode: AtomicU8::new(modes::DISPLAY_ON),
        });
        self.shared = Some(Arc::clone(&shared));

        if let Some(path) = &self.socket_path {
            self.listener = Some(Listener::start(path, shared, self.ingress_workers)?);
        }

        info!("server up");
        Ok(())
    }

    /// Orderly shutdown: stop intake, let the dispatcher drain and tear
    /// every applied value down, restore defaults, join the timer last.
    pub fn shutdown(&mut self) {
        info!("shutting down");
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
        if let Some(pulse) = self.pulse.take() {
            pulse.stop();
        }
        if let Some(gc) = self.gc.take() {
            gc.stop();
        }
        if let Some(queue) = &self.queue {
            queue.push_internal(Message::Shutdown);
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        if let Some(queue) = self.queue.take() {
            queue.close();
        }
        if let Some(wheel) = self.wheel.take() {
            wheel.shutdown();
        }
        self.shared = None;
        info!("shutdown complete");
    }

    /// Ingress context for in-process clients (and tests)
    pub fn ingress(&self) -> Option<Arc<IngressShared>> {
        self.shared.as_ref().map(Arc::clone)
    }

    pub fn requests(&self) -> &Arc<RequestManager> {
        &self.requests
    }

    pub fn cdm(&self) -> &Arc<ClientDataManager> {
        &self.cdm
    }

    pub fn properties(&self) -> &Arc<PropertiesRegistry> {
        &self.properties
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    pub fn targets(&self) -> &Arc<TargetRegistry> {
        &self.targets
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            self.shutdown();
        }
    }
}
