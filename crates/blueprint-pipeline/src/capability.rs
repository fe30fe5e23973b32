//! Capability trait, invocation request, and role-keyed registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use blueprint_types::{CapabilityRole, Outcome, Result, StepKind};

/// Request context key carrying the run's original input (evaluate_parse).
pub const ORIGINAL_INPUT_KEY: &str = "original_input";
/// Request context key carrying the parsed description (evaluate_generate).
pub const REQUIREMENTS_KEY: &str = "requirements";

// ---------------------------------------------------------------------------
// CapabilityRequest
// ---------------------------------------------------------------------------

/// Input handed to a capability for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRequest {
    pub step: StepKind,
    /// Primary payload: the initial input, parsed description, or artifact.
    pub payload: String,
    /// Secondary named inputs drawn from the execution context.
    pub context: HashMap<String, String>,
}

impl CapabilityRequest {
    pub fn new(step: StepKind, payload: impl Into<String>) -> Self {
        Self {
            step,
            payload: payload.into(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Capability: Send + Sync {
    /// Identifier used in logs and telemetry (e.g. "describe", "evaluate").
    fn name(&self) -> &str;

    /// The pipeline role this capability fills.
    fn role(&self) -> CapabilityRole;

    /// Whether a successful outcome may carry empty content. Only consulted
    /// for productive steps; evaluations never succeed empty.
    fn allows_empty_content(&self) -> bool {
        false
    }

    /// Perform the work for one step.
    ///
    /// Return `Err` for transport-level failures that the retry wrapper should
    /// see; return `Ok(Outcome::fail(..))` for a definitive failure.
    async fn invoke(&self, request: &CapabilityRequest) -> Result<Outcome>;
}

// ---------------------------------------------------------------------------
// CapabilityRegistry
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: HashMap<CapabilityRole, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a capability under the role it reports. A later registration for
    /// the same role replaces the earlier one.
    pub fn register(&mut self, capability: impl Capability + 'static) {
        self.register_arc(Arc::new(capability));
    }

    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities.insert(capability.role(), capability);
    }

    pub fn get(&self, role: CapabilityRole) -> Option<&Arc<dyn Capability>> {
        self.capabilities.get(&role)
    }

    pub fn has(&self, role: CapabilityRole) -> bool {
        self.capabilities.contains_key(&role)
    }

    /// Roles the pipeline needs that nothing is bound to, in role order.
    pub fn missing_roles(&self) -> Vec<CapabilityRole> {
        CapabilityRole::ALL
            .into_iter()
            .filter(|role| !self.has(*role))
            .collect()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bound: Vec<_> = self
            .capabilities
            .iter()
            .map(|(role, cap)| format!("{}={}", role, cap.name()))
            .collect();
        bound.sort();
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &bound)
            .finish()
    }
}
