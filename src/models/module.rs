//! Test module descriptors
//!
//! A module is one built test binary plus the build metadata needed to launch it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Process exit codes used by testmux and expected from test hosts
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERIC_FAILURE: i32 = 1;
}

/// One test binary produced by the build
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Native executable or managed `.dll` to launch
    pub binary_path: PathBuf,

    /// Project that produced the binary
    pub project_path: Option<PathBuf>,

    /// Target framework moniker, e.g. `net8.0`
    pub target_framework: Option<String>,

    /// Run-settings file forwarded to the host
    pub run_settings_path: Option<PathBuf>,

    /// Whether the binary speaks the host protocol
    pub is_test_host_capable: bool,

    /// Whether the project is a test project at all
    pub is_test_project: bool,

    /// Directory the host is started in; inherits ours when unset
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// Launch-profile environment, applied over the run-wide environment
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Launch-profile arguments, appended after every other argument
    #[serde(default)]
    pub launch_arguments: Vec<String>,
}

impl Module {
    /// Create a protocol-capable test module for a binary
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            project_path: None,
            target_framework: None,
            run_settings_path: None,
            is_test_host_capable: true,
            is_test_project: true,
            working_directory: None,
            environment: BTreeMap::new(),
            launch_arguments: Vec::new(),
        }
    }

    pub fn with_project(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn with_target_framework(mut self, tfm: impl Into<String>) -> Self {
        self.target_framework = Some(tfm.into());
        self
    }

    pub fn with_run_settings(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_settings_path = Some(path.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_launch_arguments(mut self, args: Vec<String>) -> Self {
        self.launch_arguments = args;
        self
    }

    pub fn with_test_host_capable(mut self, capable: bool) -> Self {
        self.is_test_host_capable = capable;
        self
    }

    pub fn with_test_project(mut self, is_test_project: bool) -> Self {
        self.is_test_project = is_test_project;
        self
    }

    /// Managed binaries are started through the host launcher (`dotnet exec <dll>`)
    pub fn is_managed(&self) -> bool {
        self.binary_path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("dll"))
            .unwrap_or(false)
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Path used in reports
    pub fn display_path(&self) -> String {
        self.binary_path.display().to_string()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary_path.display())?;
        if let Some(tfm) = &self.target_framework {
            write!(f, " ({tfm})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_defaults() {
        let module = Module::new("/out/Tests.dll");
        assert!(module.is_test_host_capable);
        assert!(module.is_test_project);
        assert!(module.project_path.is_none());
        assert!(module.working_directory.is_none());
        assert!(module.environment.is_empty());
        assert!(module.launch_arguments.is_empty());
    }

    #[test]
    fn test_is_managed() {
        assert!(Module::new("/out/Tests.dll").is_managed());
        assert!(Module::new("/out/Tests.DLL").is_managed());
        assert!(!Module::new("/out/Tests").is_managed());
        assert!(!Module::new("/out/Tests.exe").is_managed());
    }

    #[test]
    fn test_display_includes_framework() {
        let module = Module::new("/out/Tests.dll").with_target_framework("net8.0");
        assert_eq!(module.to_string(), "/out/Tests.dll (net8.0)");
    }
}
