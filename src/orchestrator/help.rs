//! Help aggregation
//!
//! Merges the options every module reports in help mode.

use crate::models::CommandLineOptionMessages;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HelpOption {
    pub name: String,
    pub description: String,
    pub is_built_in: bool,
    /// Modules that do not offer this option
    pub missing_from: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HelpSummary {
    pub modules: Vec<String>,
    pub built_in: Vec<HelpOption>,
    pub extension: Vec<HelpOption>,
}

impl HelpSummary {
    pub fn is_empty(&self) -> bool {
        self.built_in.is_empty() && self.extension.is_empty()
    }
}

/// Collects options per module
#[derive(Default)]
pub struct HelpAggregator {
    // module path -> option name -> (description, built in)
    modules: Mutex<BTreeMap<String, BTreeMap<String, (String, bool)>>>,
}

impl HelpAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, module_path: &str, options: &CommandLineOptionMessages) {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = modules.entry(module_path.to_string()).or_default();
        for option in options.options.iter().filter(|o| !o.is_hidden) {
            entry
                .entry(option.name.clone())
                .or_insert_with(|| (option.description.clone(), option.is_built_in));
        }
    }

    pub fn summarize(&self) -> HelpSummary {
        let modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);

        let mut merged: BTreeMap<&str, (&str, bool)> = BTreeMap::new();
        for options in modules.values() {
            for (name, (description, built_in)) in options {
                merged
                    .entry(name.as_str())
                    .or_insert((description.as_str(), *built_in));
            }
        }

        let mut summary = HelpSummary {
            modules: modules.keys().cloned().collect(),
            ..Default::default()
        };
        for (name, (description, is_built_in)) in merged {
            let missing_from = modules
                .iter()
                .filter(|(_, options)| !options.contains_key(name))
                .map(|(module, _)| module.clone())
                .collect();
            let option = HelpOption {
                name: name.to_string(),
                description: description.to_string(),
                is_built_in,
                missing_from,
            };
            if is_built_in {
                summary.built_in.push(option);
            } else {
                summary.extension.push(option);
            }
        }
        summary
    }
}
