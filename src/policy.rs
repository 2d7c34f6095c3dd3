//! Capability policy engine.
//!
//! A policy is an ordered rule list evaluated per call: the LAST rule whose
//! phase and method both match decides, and a call no rule matches is denied.
//! Rather than wrapping a shared surface in place, `protect` builds a fresh
//! surface for the current phase in which every denied callable is replaced
//! by a stub that fails without running the original.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::host::{HostFn, ModuleSurface, Namespace};

pub const WILDCARD: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "wildcard")]
    pub phase: String,
    /// `*`, a bare method name, `namespace.method`, or `namespace.*`.
    #[serde(default = "wildcard")]
    pub method: String,
    pub allow: bool,
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

impl Rule {
    pub fn allow(phase: &str, method: &str) -> Self {
        Self {
            phase: phase.to_string(),
            method: method.to_string(),
            allow: true,
        }
    }

    pub fn deny(phase: &str, method: &str) -> Self {
        Self {
            phase: phase.to_string(),
            method: method.to_string(),
            allow: false,
        }
    }

    fn matches(&self, phase: &str, method: &str) -> bool {
        (self.phase == WILDCARD || self.phase == phase) && method_matches(&self.method, method)
    }
}

fn method_matches(pattern: &str, method: &str) -> bool {
    if pattern == WILDCARD || pattern == method {
        return true;
    }
    match method.split_once('.') {
        Some((namespace, name)) => match pattern.strip_suffix(".*") {
            Some(prefix) => prefix == namespace,
            None => pattern == name,
        },
        None => false,
    }
}

/// Rules used when the host supplies none.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::deny(WILDCARD, WILDCARD),
        Rule::allow(WILDCARD, "ctx.*"),
        Rule::allow(WILDCARD, "config.get_config"),
        Rule::allow("download", WILDCARD),
        Rule::deny("download", "dataset.*"),
        Rule::allow("transform", "dataset.*"),
        Rule::allow("transform", "datasets.*"),
    ]
}

/// Per-run policy. Never shared between runs.
#[derive(Clone, Debug)]
pub struct Policy {
    rules: Vec<Rule>,
    phase: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Policy {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            phase: String::new(),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn set_phase(&mut self, phase: impl Into<String>) {
        self.phase = phase.into();
    }

    pub fn allowed(&self, phase: &str, method: &str) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(phase, method))
            .map(|rule| rule.allow)
            .unwrap_or(false)
    }

    /// Builds the surface a guest may see in the current phase.
    pub fn protect(&self, surface: &ModuleSurface) -> ModuleSurface {
        let mut protected = ModuleSurface::new();
        for namespace in surface.namespaces() {
            let mut filtered = Namespace::new(namespace.name());
            for (name, f) in namespace.methods() {
                let method = format!("{}.{}", namespace.name(), name);
                let guarded = if self.allowed(&self.phase, &method) {
                    f.clone()
                } else {
                    denied(&self.phase, method)
                };
                filtered.insert(name, guarded);
            }
            protected.insert(filtered);
        }
        protected
    }
}

fn denied(phase: &str, method: String) -> HostFn {
    let phase = phase.to_string();
    Rc::new(move |_args| {
        log::debug!("policy denied {method} in {phase} phase");
        Err(Error::PolicyViolation {
            phase: phase.clone(),
            method: method.clone(),
        })
    })
}
