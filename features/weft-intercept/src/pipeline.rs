//! The handler pipeline around one method.
//!
//! Handlers nest: each receives the call and a [Next] continuation. A
//! handler may run the continuation and observe or replace its outcome,
//! mutate the arguments first, or skip the continuation entirely and
//! synthesize its own return, in which case the real method never executes.
//! Errors propagate outward through every enclosing handler unless one
//! catches and replaces them.

use std::{collections::HashMap, sync::Arc};

use crate::{
    call::{CallReturn, MethodCall, MethodProfile},
    rules::MatchingRule,
};

/// One behavior in a pipeline
pub trait CallHandler: Send + Sync {
    /// Priority; lower runs outermost. Ties keep registration order.
    fn order(&self) -> i32 {
        0
    }

    fn invoke(&self, call: &mut MethodCall, next: Next<'_>) -> CallReturn;
}

/// Continuation to the rest of the pipeline, with the real method innermost
pub struct Next<'a> {
    handlers: &'a [Arc<dyn CallHandler>],
    target: &'a mut (dyn FnMut(&mut MethodCall) -> CallReturn + 'a),
}

impl<'a> Next<'a> {
    pub fn invoke(self, call: &mut MethodCall) -> CallReturn {
        match self.handlers.split_first() {
            Some((handler, rest)) => handler.invoke(
                call,
                Next {
                    handlers: rest,
                    target: self.target,
                },
            ),
            None => (self.target)(call),
        }
    }
}

/// The ordered handlers wrapping one method
pub struct HandlerPipeline {
    handlers: Vec<Arc<dyn CallHandler>>,
}

impl HandlerPipeline {
    fn new(mut handlers: Vec<Arc<dyn CallHandler>>) -> Self {
        // Stable: ties at the same priority keep registration order
        handlers.sort_by_key(|handler| handler.order());
        HandlerPipeline { handlers }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn invoke(
        &self,
        call: &mut MethodCall,
        mut target: impl FnMut(&mut MethodCall) -> CallReturn,
    ) -> CallReturn {
        Next {
            handlers: &self.handlers,
            target: &mut target,
        }
        .invoke(call)
    }
}

/// Ordered (rule set, handler set) pairs configuring one interception
#[derive(Default)]
pub struct InterceptionPolicy {
    entries: Vec<PolicyEntry>,
}

struct PolicyEntry {
    rules: Vec<Arc<dyn MatchingRule>>,
    handlers: Vec<Arc<dyn CallHandler>>,
}

impl InterceptionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler set applying to methods matched by every given rule
    pub fn with(
        mut self,
        rules: Vec<Arc<dyn MatchingRule>>,
        handlers: Vec<Arc<dyn CallHandler>>,
    ) -> Self {
        self.entries.push(PolicyEntry { rules, handlers });
        self
    }

    /// Evaluate the rules once per method and freeze the resulting
    /// pipelines; this happens at proxy-creation time, never per call
    pub fn pipelines_for(&self, methods: &[MethodProfile]) -> PipelineSet {
        let mut per_method = HashMap::new();
        for method in methods {
            let mut handlers: Vec<Arc<dyn CallHandler>> = Vec::new();
            for entry in &self.entries {
                if entry.rules.iter().all(|rule| rule.matches(method)) {
                    handlers.extend(entry.handlers.iter().cloned());
                }
            }
            if !handlers.is_empty() {
                tracing::debug!(
                    method = method.name,
                    handlers = handlers.len(),
                    "built interception pipeline"
                );
                per_method.insert(method.name, HandlerPipeline::new(handlers));
            }
        }
        PipelineSet { per_method }
    }
}

/// The frozen per-method pipelines of one proxied target
pub struct PipelineSet {
    per_method: HashMap<&'static str, HandlerPipeline>,
}

impl std::fmt::Debug for PipelineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSet")
            .field("methods", &self.per_method.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PipelineSet {
    /// Route a call through its method's pipeline; methods without one go
    /// straight to the target
    pub fn invoke(
        &self,
        call: &mut MethodCall,
        mut target: impl FnMut(&mut MethodCall) -> CallReturn,
    ) -> CallReturn {
        match self.per_method.get(call.method) {
            Some(pipeline) => pipeline.invoke(call, target),
            None => target(call),
        }
    }

    pub fn handler_count(&self, method: &str) -> usize {
        self.per_method
            .get(method)
            .map(HandlerPipeline::len)
            .unwrap_or(0)
    }
}
