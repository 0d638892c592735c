use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};
use crate::oracle::CacheGeometry;

/// Name of the statistics dump inside the simulator output directory.
pub const REPORT_FILE: &str = "stats.txt";

/// Arguments handed to the workload through the simulator's `--options`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Arguments {
    #[default]
    None,
    List(Vec<String>),
    Joined(String),
}

impl Arguments {
    pub fn list<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Arguments::List(args.into_iter().map(|a| a.to_string()).collect())
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arguments::None => Ok(()),
            Arguments::List(args) => f.write_str(&args.join(" ")),
            Arguments::Joined(args) => f.write_str(args),
        }
    }
}

/// Launches the simulator with the lab cache configuration.
#[derive(Debug, Clone)]
pub struct WorkloadRunner {
    pub simulator: PathBuf,
    pub config_script: PathBuf,
    /// Simulator output directory; the report lands in `out_dir/stats.txt`.
    pub out_dir: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub quiet: bool,
}

impl WorkloadRunner {
    pub fn report_path(&self) -> PathBuf {
        let out_dir = match &self.working_dir {
            Some(dir) if self.out_dir.is_relative() => dir.join(&self.out_dir),
            _ => self.out_dir.clone(),
        };
        out_dir.join(REPORT_FILE)
    }

    pub fn build_command(
        &self,
        executable: &Path,
        arguments: &Arguments,
        geometry: &CacheGeometry,
    ) -> Command {
        let mut command = Command::new(&self.simulator);
        if self.quiet {
            command.arg("-q");
        }
        command
            .arg("--outdir")
            .arg(&self.out_dir)
            .arg(&self.config_script)
            .arg("--l1CacheSize")
            .arg(geometry.size().to_string())
            .arg("--l1CacheAssociativity")
            .arg(geometry.associativity().to_string())
            .arg("--cmd")
            .arg(executable)
            .arg("--options")
            .arg(arguments.to_string());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Runs the workload to completion and returns the path of the fresh report.
    ///
    /// The previous report in `out_dir` is removed first, so a run that
    /// writes nothing cannot be checked against a stale one.
    pub fn run(
        &self,
        executable: &Path,
        arguments: &Arguments,
        geometry: &CacheGeometry,
    ) -> Result<PathBuf> {
        let report = self.report_path();
        match fs::remove_file(&report) {
            Ok(()) => debug!(report = %report.display(), "removed previous report"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(Error::Io { path: report, source }),
        }

        let mut command = self.build_command(executable, arguments, geometry);
        debug!(
            program = %self.simulator.display(),
            args = ?command_args(&command),
            "launching simulator"
        );

        let status = command.status().map_err(|source| Error::Io {
            path: self.simulator.clone(),
            source,
        })?;
        if !status.success() {
            return Err(Error::ExternalProcess { status });
        }
        Ok(report)
    }
}

/// Flattened argument vector of a command, for logging and tests.
pub fn command_args(command: &Command) -> Vec<OsString> {
    command.get_args().map(|a| a.to_os_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn runner(out_dir: &str) -> WorkloadRunner {
        WorkloadRunner {
            simulator: PathBuf::from("./build/X86/gem5.opt"),
            config_script: PathBuf::from("configs/tdt4260/cache_lab.py"),
            out_dir: PathBuf::from(out_dir),
            working_dir: None,
            quiet: true,
        }
    }

    #[test]
    fn arguments_join_with_spaces() {
        assert_eq!(Arguments::None.to_string(), "");
        assert_eq!(Arguments::list([4096, 2]).to_string(), "4096 2");
        assert_eq!(Arguments::Joined("-n 3".into()).to_string(), "-n 3");
        assert_eq!(Arguments::List(vec![]).to_string(), "");
    }

    #[test]
    fn command_carries_geometry_and_workload() {
        let geometry = CacheGeometry::new(8192, 4).unwrap();
        let command = runner("m5out").build_command(
            Path::new("bin/test_associativity"),
            &Arguments::list([8192, 4]),
            &geometry,
        );
        assert_eq!(command.get_program(), "./build/X86/gem5.opt");
        let args: Vec<String> = command_args(&command)
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "-q",
                "--outdir",
                "m5out",
                "configs/tdt4260/cache_lab.py",
                "--l1CacheSize",
                "8192",
                "--l1CacheAssociativity",
                "4",
                "--cmd",
                "bin/test_associativity",
                "--options",
                "8192 4",
            ]
        );
    }

    #[test]
    fn report_path_follows_working_dir() {
        let mut r = runner("m5out");
        assert_eq!(r.report_path(), PathBuf::from("m5out/stats.txt"));
        r.working_dir = Some(PathBuf::from("/opt/gem5"));
        assert_eq!(r.report_path(), PathBuf::from("/opt/gem5/m5out/stats.txt"));
        r.out_dir = PathBuf::from("/tmp/run0");
        assert_eq!(r.report_path(), PathBuf::from("/tmp/run0/stats.txt"));
    }

    #[test]
    fn missing_simulator_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner("out");
        r.simulator = dir.path().join("no-such-gem5");
        let geometry = CacheGeometry::new(1024, 1).unwrap();
        let result = r.run(Path::new("wl"), &Arguments::None, &geometry);
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn previous_report_is_removed_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner(dir.path().to_str().unwrap());
        r.simulator = dir.path().join("no-such-gem5");
        let stale = r.report_path();
        fs::write(&stale, "---------- Begin\n---------- End\n").unwrap();
        let geometry = CacheGeometry::new(1024, 1).unwrap();
        assert!(r.run(Path::new("wl"), &Arguments::None, &geometry).is_err());
        assert!(!stale.exists());
    }
}
