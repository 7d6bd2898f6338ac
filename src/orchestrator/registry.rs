//! Execution registry
//!
//! Maps in-flight supervisors to the metadata their host reported in its handshake.

use crate::models::{Handshake, HandshakeProperty, Module};
use crate::supervisor::{SupervisorId, SupervisorInfo};
use dashmap::DashMap;
use serde::Serialize;

/// Metadata attached to every event of one supervisor
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExecutionContext {
    pub module_path: String,
    pub target_framework: Option<String>,
    pub architecture: Option<String>,
    pub execution_id: Option<String>,
}

impl ExecutionContext {
    pub fn from_module(module: &Module) -> Self {
        Self {
            module_path: module.display_path(),
            target_framework: module.target_framework.clone(),
            architecture: None,
            execution_id: None,
        }
    }

    pub fn from_handshake(module: &Module, handshake: &Handshake) -> Self {
        let fallback = Self::from_module(module);
        Self {
            module_path: handshake
                .get(HandshakeProperty::ModulePath)
                .map(str::to_string)
                .unwrap_or(fallback.module_path),
            target_framework: handshake
                .get(HandshakeProperty::Framework)
                .map(short_target_framework)
                .or(fallback.target_framework),
            architecture: handshake
                .get(HandshakeProperty::Architecture)
                .map(str::to_lowercase),
            execution_id: handshake.execution_id().map(str::to_string),
        }
    }
}

/// Concurrent map from supervisor to execution context
#[derive(Default)]
pub struct ExecutionRegistry {
    contexts: DashMap<SupervisorId, ExecutionContext>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the context for a supervisor; the first handshake wins
    pub fn on_handshake(&self, info: &SupervisorInfo, handshake: &Handshake) -> ExecutionContext {
        self.contexts
            .entry(info.id)
            .or_insert_with(|| ExecutionContext::from_handshake(&info.module, handshake))
            .clone()
    }

    pub fn get(&self, id: SupervisorId) -> Option<ExecutionContext> {
        self.contexts.get(&id).map(|entry| entry.value().clone())
    }

    /// Context for a supervisor, falling back to the module's static metadata
    pub fn context(&self, info: &SupervisorInfo) -> ExecutionContext {
        self.get(info.id)
            .unwrap_or_else(|| ExecutionContext::from_module(&info.module))
    }

    pub fn remove(&self, id: SupervisorId) -> Option<ExecutionContext> {
        self.contexts.remove(&id).map(|(_, context)| context)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Short moniker for a framework description, e.g. `.NETCoreApp,Version=v8.0` -> `net8.0`
///
/// Unrecognized descriptions are returned unchanged.
pub fn short_target_framework(framework: &str) -> String {
    let framework = framework.trim();

    let short = if let Some((name, version)) = framework.split_once(",Version=v") {
        match name {
            ".NETCoreApp" => core_moniker(version),
            ".NETFramework" => Some(format!("net{}", version.replace('.', ""))),
            ".NETStandard" => Some(format!("netstandard{version}")),
            _ => None,
        }
    } else if let Some(version) = framework.strip_prefix(".NET Framework ") {
        Some(format!("net{}", major_minor(version).replace('.', "")))
    } else if let Some(version) = framework.strip_prefix(".NET Core ") {
        Some(format!("netcoreapp{}", major_minor(version)))
    } else if let Some(version) = framework.strip_prefix(".NET ") {
        core_moniker(version)
    } else {
        None
    };

    short.unwrap_or_else(|| framework.to_string())
}

fn major_minor(version: &str) -> String {
    version.split('.').take(2).collect::<Vec<_>>().join(".")
}

fn core_moniker(version: &str) -> Option<String> {
    let major: u32 = version.split('.').next()?.parse().ok()?;
    let version = major_minor(version);
    if major >= 5 {
        Some(format!("net{version}"))
    } else {
        Some(format!("netcoreapp{version}"))
    }
}
