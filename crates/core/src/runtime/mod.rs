use std::cell::Cell;
use std::rc::Rc;

use crate::config::{CoordinatorConfig, OverlayOptions};
use crate::controller::{InstanceController, InstanceId, RenderAdapter, SetupRequest};
use crate::gate::ResolvedData;
use crate::host::HostPage;
use crate::plugins::{self, PluginServices, OPTIONS};
use crate::providers::ResourceProvider;
use crate::registry::{ContainerRegistry, ContainerRequest};
use crate::script::ScriptLoadDeduplicator;
use crate::timers::TimerQueue;
use crate::Result;

/// Owns the timer queue, the container registry and its id counters, the
/// script deduplicator and the provider. Built once at startup.
pub struct OverlayRuntime {
    timers: TimerQueue,
    registry: ContainerRegistry,
    scripts: ScriptLoadDeduplicator,
    provider: Rc<dyn ResourceProvider>,
    config: CoordinatorConfig,
    next_instance: Cell<u64>,
}

impl OverlayRuntime {
    pub fn new(
        timers: TimerQueue,
        host: Rc<dyn HostPage>,
        provider: Rc<dyn ResourceProvider>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            timers,
            registry: ContainerRegistry::new(host),
            scripts: ScriptLoadDeduplicator::new(provider.clone()),
            provider,
            config,
            next_instance: Cell::new(0),
        })
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    pub fn scripts(&self) -> &ScriptLoadDeduplicator {
        &self.scripts
    }

    pub fn host(&self) -> &Rc<dyn HostPage> {
        self.registry.host()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Validates `options`, starts the plugin's prerequisites and sets up a
    /// new instance. Returns as soon as setup is underway.
    pub fn setup(
        &self,
        options: &OverlayOptions,
        adapter: Rc<dyn RenderAdapter>,
    ) -> Result<InstanceController> {
        options.validate()?;
        let kind = options.kind();
        let id = InstanceId(self.next_instance.get() + 1);
        self.next_instance.set(id.0);

        let container = match &options.container_id {
            Some(container_id) => ContainerRequest::Shared(container_id.clone()),
            None => ContainerRequest::Exclusive {
                prefix: kind.id_prefix().to_string(),
            },
        };

        let services = PluginServices {
            provider: self.provider.as_ref(),
            scripts: &self.scripts,
            host: self.registry.host(),
        };
        let tasks = plugins::prerequisites(&options.plugin, &services);

        let mut seed = ResolvedData::default();
        seed.insert(OPTIONS, serde_json::to_value(&options.plugin)?);

        let controller = InstanceController::new(id, kind, adapter, self.registry.clone());
        controller.setup(
            &self.timers,
            SetupRequest {
                target_id: options.target.clone(),
                container,
                class: kind.css_class().to_string(),
                tasks,
                seed,
                policy: self.config.poll_policy(),
            },
        );
        Ok(controller)
    }
}

impl std::fmt::Debug for OverlayRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayRuntime")
            .field("now_ms", &self.timers.now_ms())
            .field("registry", &self.registry)
            .field("scripts", &self.scripts)
            .field("config", &self.config)
            .finish()
    }
}
