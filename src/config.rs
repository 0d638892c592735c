//! Harness configuration.
//!
//! Every field has a default matching the lab's gem5 checkout layout, so an
//! empty JSON object (or no file at all) runs the standard sweep.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::driver::{CounterNames, FailurePolicy, SimulatorWorkload, Sweep};
use crate::error::{Error, Result};
use crate::runner::WorkloadRunner;

mod defaults {
    pub const SIMULATOR: &str = "./build/X86/gem5.opt";
    pub const CONFIG_SCRIPT: &str = "configs/tdt4260/cache_lab.py";
    pub const WORKLOAD: &str =
        "src/tdt4260/cache_lab/programs/test_associativity/test_associativity";
    pub const OUT_DIR: &str = "m5out";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub simulator: PathBuf,
    pub config_script: PathBuf,
    pub workload: PathBuf,
    pub out_dir: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub quiet: bool,
    pub sweep: Sweep,
    pub counters: CounterNames,
    pub policy: FailurePolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            simulator: defaults::SIMULATOR.into(),
            config_script: defaults::CONFIG_SCRIPT.into(),
            workload: defaults::WORKLOAD.into(),
            out_dir: defaults::OUT_DIR.into(),
            working_dir: None,
            quiet: true,
            sweep: Sweep::default(),
            counters: CounterNames::default(),
            policy: FailurePolicy::default(),
        }
    }
}

impl HarnessConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn runner(&self) -> WorkloadRunner {
        WorkloadRunner {
            simulator: self.simulator.clone(),
            config_script: self.config_script.clone(),
            out_dir: self.out_dir.clone(),
            working_dir: self.working_dir.clone(),
            quiet: self.quiet,
        }
    }

    pub fn workload(&self) -> SimulatorWorkload {
        SimulatorWorkload {
            runner: self.runner(),
            executable: self.workload.clone(),
        }
    }
}
