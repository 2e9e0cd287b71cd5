// Plugin registry
// Holds pipeline-wide stages and cascade extend rules. Clients take an
// immutable snapshot when they are built, so registering or resetting
// afterwards never changes a client that already exists.

use crate::api::Api;
use crate::cascade::SharedRule;
use crate::error::{RapierError, Result};
use crate::hook::{Hook, SharedHook};
use crate::options::Options;
use crate::result::CallResult;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Built-in pre-request slot
pub const PREFILTER_STAGE: &str = "_prefilter";
/// Built-in post-response slot
pub const PROCESS_RESULT_STAGE: &str = "_processResult";

const BUILTIN_PLUGIN: &str = "builtin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagePhase {
    PreRequest,
    PostResponse,
}

impl StagePhase {
    fn infer(name: &str) -> Option<Self> {
        match name {
            PREFILTER_STAGE => Some(StagePhase::PreRequest),
            PROCESS_RESULT_STAGE => Some(StagePhase::PostResponse),
            _ => None,
        }
    }
}

/// A pipeline-wide stage as declared by a plugin
#[derive(Clone)]
pub struct Stage {
    name: String,
    phase: Option<StagePhase>,
    ordinal: i32,
    hook: SharedHook,
}

impl Stage {
    /// A stage whose phase is inferred from the well-known slot names
    /// `_prefilter` and `_processResult`.
    pub fn new(name: impl Into<String>, hook: SharedHook) -> Self {
        let name = name.into();
        let phase = StagePhase::infer(&name);
        Self {
            name,
            phase,
            ordinal: 0,
            hook,
        }
    }

    pub fn pre_request(name: impl Into<String>, hook: SharedHook) -> Self {
        Self {
            phase: Some(StagePhase::PreRequest),
            ..Self::new(name, hook)
        }
    }

    pub fn post_response(name: impl Into<String>, hook: SharedHook) -> Self {
        Self {
            phase: Some(StagePhase::PostResponse),
            ..Self::new(name, hook)
        }
    }

    /// Position within the phase; lower runs first, ties keep registration order
    pub fn ordinal(mut self, ordinal: i32) -> Self {
        self.ordinal = ordinal;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

/// A named bundle of stages and extend rules
#[derive(Clone)]
pub struct Plugin {
    name: String,
    stages: Vec<Stage>,
    extend_rules: Vec<(String, SharedRule)>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            extend_rules: Vec::new(),
        }
    }

    /// Add a stage under a well-known slot name (`_prefilter`, `_processResult`)
    pub fn stage(self, name: impl Into<String>, hook: SharedHook) -> Self {
        self.with_stage(Stage::new(name, hook))
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn extend_rule(mut self, key: impl Into<String>, rule: SharedRule) -> Self {
        self.extend_rules.push((key.into(), rule));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RapierError::registry("plugin name must not be empty"));
        }
        let mut seen: Vec<&str> = Vec::new();
        for stage in &self.stages {
            if stage.name.len() < 2 || !stage.name.starts_with('_') {
                return Err(RapierError::registry(format!(
                    "plugin '{}': stage name '{}' must start with '_' followed by a name; \
                     unprefixed names belong to declaration hooks",
                    self.name, stage.name
                )));
            }
            if stage.phase.is_none() {
                return Err(RapierError::registry(format!(
                    "plugin '{}': cannot infer phase of stage '{}'",
                    self.name, stage.name
                )));
            }
            if seen.contains(&stage.name.as_str()) {
                return Err(RapierError::registry(format!(
                    "plugin '{}' declares stage '{}' twice",
                    self.name, stage.name
                )));
            }
            seen.push(&stage.name);
        }
        for (key, _) in &self.extend_rules {
            if key.trim().is_empty() {
                return Err(RapierError::registry(format!(
                    "plugin '{}': extend rule key must not be empty",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("stages", &self.stages)
            .field(
                "extend_rules",
                &self.extend_rules.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Anything that can be registered: a plugin record or a factory producing one
pub trait IntoPlugin {
    fn into_plugin(self) -> Plugin;
}

impl IntoPlugin for Plugin {
    fn into_plugin(self) -> Plugin {
        self
    }
}

impl<F> IntoPlugin for F
where
    F: FnOnce() -> Plugin,
{
    fn into_plugin(self) -> Plugin {
        self()
    }
}

/// A stage as stored in the registry
#[derive(Clone)]
pub struct RegisteredStage {
    pub name: String,
    pub plugin: String,
    pub phase: StagePhase,
    pub ordinal: i32,
    pub hook: SharedHook,
    sequence: u64,
}

impl fmt::Debug for RegisteredStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredStage")
            .field("name", &self.name)
            .field("plugin", &self.plugin)
            .field("phase", &self.phase)
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

struct RegistryState {
    stages: IndexMap<String, RegisteredStage>,
    rules: IndexMap<String, SharedRule>,
    plugins: Vec<String>,
    next_sequence: u64,
}

impl RegistryState {
    fn with_builtins() -> Self {
        let mut state = Self {
            stages: IndexMap::new(),
            rules: IndexMap::new(),
            plugins: Vec::new(),
            next_sequence: 0,
        };
        let noop: SharedHook = Arc::new(Noop);
        state.insert_stage(BUILTIN_PLUGIN, PREFILTER_STAGE, StagePhase::PreRequest, 0, noop.clone());
        state.insert_stage(BUILTIN_PLUGIN, PROCESS_RESULT_STAGE, StagePhase::PostResponse, 0, noop);
        state
    }

    fn insert_stage(
        &mut self,
        plugin: &str,
        name: &str,
        phase: StagePhase,
        ordinal: i32,
        hook: SharedHook,
    ) -> Option<RegisteredStage> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        // a replaced stage takes the registration position of its replacement
        let previous = self.stages.shift_remove(name);
        self.stages.insert(
            name.to_string(),
            RegisteredStage {
                name: name.to_string(),
                plugin: plugin.to_string(),
                phase,
                ordinal,
                hook,
                sequence,
            },
        );
        previous
    }
}

#[derive(Debug)]
struct Noop;

#[async_trait]
impl Hook for Noop {
    async fn run(&self, _api: &Api, _options: &mut Options, _result: &mut CallResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Store of registered stages and extend rules.
///
/// Use [`PluginRegistry::new`] for an injectable registry or
/// [`PluginRegistry::global`] for the process-wide one.
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::with_builtins()),
        }
    }

    /// The process-wide registry used by clients that are not given one
    pub fn global() -> &'static PluginRegistry {
        static GLOBAL: OnceLock<PluginRegistry> = OnceLock::new();
        GLOBAL.get_or_init(PluginRegistry::new)
    }

    /// Register a plugin or a factory producing one.
    ///
    /// The record is validated before anything is applied. Stage name
    /// collisions resolve to the latest registration.
    pub fn register(&self, plugin: impl IntoPlugin) -> Result<()> {
        let plugin = plugin.into_plugin();
        plugin.validate()?;

        let mut state = self.write();
        for stage in &plugin.stages {
            let Some(phase) = stage.phase else {
                continue;
            };
            let previous = state.insert_stage(
                &plugin.name,
                &stage.name,
                phase,
                stage.ordinal,
                stage.hook.clone(),
            );
            if let Some(previous) = previous.filter(|p| p.plugin != BUILTIN_PLUGIN) {
                warn!(
                    "Stage '{}' from plugin '{}' replaced by plugin '{}'",
                    stage.name, previous.plugin, plugin.name
                );
            }
        }
        for (key, rule) in &plugin.extend_rules {
            if state.rules.insert(key.clone(), rule.clone()).is_some() {
                warn!("Extend rule '{}' replaced by plugin '{}'", key, plugin.name);
            }
        }
        state.plugins.push(plugin.name.clone());

        info!(
            "Registered plugin '{}' ({} stages, {} extend rules)",
            plugin.name,
            plugin.stages.len(),
            plugin.extend_rules.len()
        );
        Ok(())
    }

    /// Drop every registered stage and rule, restoring the built-in slots
    pub fn reset(&self) {
        *self.write() = RegistryState::with_builtins();
        debug!("Plugin registry reset");
    }

    /// Immutable copy of the current stages and rules
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read();
        let mut stages: Vec<RegisteredStage> = state.stages.values().cloned().collect();
        stages.sort_by_key(|s| (s.ordinal, s.sequence));

        let (pre, post): (Vec<_>, Vec<_>) = stages
            .into_iter()
            .partition(|s| s.phase == StagePhase::PreRequest);

        RegistrySnapshot {
            pre_request: pre.into(),
            post_response: post.into(),
            rules: Arc::new(state.rules.clone()),
        }
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.read().plugins.clone()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.read().stages.keys().cloned().collect()
    }

    pub fn has_rule(&self, key: &str) -> bool {
        self.read().rules.contains_key(key)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("PluginRegistry")
            .field("plugins", &state.plugins)
            .field("stages", &state.stages.keys().collect::<Vec<_>>())
            .field("rules", &state.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Register on the process-wide registry
pub fn register_plugin(plugin: impl IntoPlugin) -> Result<()> {
    PluginRegistry::global().register(plugin)
}

/// Reset the process-wide registry
pub fn reset_plugins() {
    PluginRegistry::global().reset()
}

/// Stages and rules frozen at client build time
#[derive(Clone)]
pub struct RegistrySnapshot {
    pre_request: Arc<[RegisteredStage]>,
    post_response: Arc<[RegisteredStage]>,
    rules: Arc<IndexMap<String, SharedRule>>,
}

impl RegistrySnapshot {
    /// Stages of a phase in execution order
    pub fn stages(&self, phase: StagePhase) -> &[RegisteredStage] {
        match phase {
            StagePhase::PreRequest => &self.pre_request,
            StagePhase::PostResponse => &self.post_response,
        }
    }

    pub fn rules(&self) -> &IndexMap<String, SharedRule> {
        &self.rules
    }
}

impl fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("pre_request", &self.pre_request)
            .field("post_response", &self.post_response)
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}
