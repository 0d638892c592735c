//! Sweeps cache geometries through the workload and checks every phase
//! against the oracle.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::oracle::{CacheGeometry, ExpectedPhase, PhaseSpec, TEST_ASSOCIATIVITY, expected_phases};
use crate::runner::{Arguments, WorkloadRunner};
use crate::stats_parser::{Snapshot, as_count, parse_report_file};

/// Something that runs the workload for one geometry and leaves a report behind.
pub trait Workload {
    fn run(&self, geometry: &CacheGeometry) -> Result<PathBuf>;
}

/// The lab workload: runs `executable` under the simulator with
/// `<size> <associativity>` as its arguments.
#[derive(Debug, Clone)]
pub struct SimulatorWorkload {
    pub runner: WorkloadRunner,
    pub executable: PathBuf,
}

impl Workload for SimulatorWorkload {
    fn run(&self, geometry: &CacheGeometry) -> Result<PathBuf> {
        let arguments = Arguments::list([geometry.size(), geometry.associativity()]);
        self.runner.run(&self.executable, &arguments, geometry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Loads,
    Stores,
    Hits,
    Misses,
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CounterKind::Loads => "loads",
            CounterKind::Stores => "stores",
            CounterKind::Hits => "hits",
            CounterKind::Misses => "misses",
        })
    }
}

/// Report counters the verdicts are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterNames {
    pub hits: String,
    pub misses: String,
    pub loads: String,
    pub stores: String,
}

impl Default for CounterNames {
    fn default() -> Self {
        CounterNames {
            hits: "system.cpu.cache_hierarchy.L1_Cache.reqsServiced".into(),
            misses: "system.cpu.cache_hierarchy.L1_IC.reqsReceived".into(),
            loads: "system.cpu.commitStats0.numLoadInsts".into(),
            stores: "system.cpu.commitStats0.numStoreInsts".into(),
        }
    }
}

impl CounterNames {
    pub fn name(&self, kind: CounterKind) -> &str {
        match kind {
            CounterKind::Loads => &self.loads,
            CounterKind::Stores => &self.stores,
            CounterKind::Hits => &self.hits,
            CounterKind::Misses => &self.misses,
        }
    }

    fn read(&self, snapshot: &Snapshot, phase: usize, kind: CounterKind) -> Result<u64> {
        let name = self.name(kind);
        let value = snapshot.get(name).ok_or_else(|| Error::MissingCounter {
            phase,
            name: name.to_string(),
        })?;
        as_count(value).ok_or_else(|| Error::InvalidCounter {
            phase,
            name: name.to_string(),
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sweep {
    pub associativities: Vec<u64>,
    pub cache_sizes: Vec<u64>,
}

impl Default for Sweep {
    fn default() -> Self {
        Sweep {
            associativities: vec![1, 2, 4, 8, 16],
            cache_sizes: vec![1024, 2048, 4096, 8192, 16384, 32768, 65536],
        }
    }
}

impl Sweep {
    /// `(cache size, associativity)` pairs, associativity-major.
    pub fn entries(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.associativities
            .iter()
            .flat_map(|&assoc| self.cache_sizes.iter().map(move |&size| (size, assoc)))
    }

    pub fn len(&self) -> usize {
        self.associativities.len() * self.cache_sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the sweep at the first failing entry.
    #[default]
    FailFast,
    /// Run every entry and report all failures at the end.
    FullSweep,
}

/// Counters read back from one phase. Hits and misses are only read when
/// the phase constrains them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedPhase {
    pub loads: u64,
    pub stores: u64,
    pub hits: Option<u64>,
    pub misses: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseVerdict {
    pub phase: usize,
    pub label: &'static str,
    pub expected: ExpectedPhase,
    pub observed: ObservedPhase,
}

impl PhaseVerdict {
    /// First counter that disagrees with the expectation.
    pub fn mismatch(&self) -> Option<Error> {
        let exp = &self.expected;
        let obs = &self.observed;
        let checks = [
            (CounterKind::Loads, Some(exp.loads), Some(obs.loads)),
            (CounterKind::Stores, Some(exp.stores), Some(obs.stores)),
            (CounterKind::Hits, exp.hits, obs.hits),
            (CounterKind::Misses, exp.misses, obs.misses),
        ];
        checks.into_iter().find_map(|(counter, expected, actual)| match (expected, actual) {
            (Some(expected), Some(actual)) if expected != actual => Some(Error::Mismatch {
                phase: self.phase,
                label: self.label,
                counter,
                expected,
                actual,
            }),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub struct EntryReport {
    pub size: u64,
    pub associativity: u64,
    pub result: Result<Vec<PhaseVerdict>>,
}

impl EntryReport {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for EntryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "size {} associativity {}: ", self.size, self.associativity)?;
        match &self.result {
            Ok(verdicts) => write!(f, "ok ({} phases)", verdicts.len()),
            Err(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub entries: Vec<EntryReport>,
}

impl SweepReport {
    pub fn passed(&self) -> bool {
        self.entries.iter().all(EntryReport::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries.iter().filter(|e| !e.passed())
    }
}

/// Checks parsed snapshots against every phase that applies to `geometry`.
///
/// Fails on the first missing phase, missing counter or mismatch.
pub fn check_snapshots(
    phases: &'static [PhaseSpec],
    geometry: &CacheGeometry,
    snapshots: &[Snapshot],
    counters: &CounterNames,
) -> Result<Vec<PhaseVerdict>> {
    let expected = expected_phases(phases, geometry);
    let required = expected.last().map_or(0, |(i, _, _)| i + 1);
    if snapshots.len() < required {
        return Err(Error::MissingPhase {
            expected: required,
            found: snapshots.len(),
        });
    }

    let mut verdicts = Vec::with_capacity(expected.len());
    for (phase, spec, exp) in expected {
        let snapshot = &snapshots[phase];
        let read = |kind| counters.read(snapshot, phase, kind);
        let observed = ObservedPhase {
            loads: read(CounterKind::Loads)?,
            stores: read(CounterKind::Stores)?,
            hits: exp.hits.map(|_| read(CounterKind::Hits)).transpose()?,
            misses: exp.misses.map(|_| read(CounterKind::Misses)).transpose()?,
        };
        let verdict = PhaseVerdict {
            phase,
            label: spec.label,
            expected: exp,
            observed,
        };
        if let Some(mismatch) = verdict.mismatch() {
            return Err(mismatch);
        }
        verdicts.push(verdict);
    }
    Ok(verdicts)
}

#[derive(Debug)]
pub struct Verifier<W> {
    workload: W,
    phases: &'static [PhaseSpec],
    counters: CounterNames,
    policy: FailurePolicy,
}

impl<W: Workload> Verifier<W> {
    pub fn new(workload: W) -> Self {
        Verifier {
            workload,
            phases: TEST_ASSOCIATIVITY,
            counters: CounterNames::default(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_counters(mut self, counters: CounterNames) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn verify(&self, geometry: &CacheGeometry) -> Result<Vec<PhaseVerdict>> {
        let report = self.workload.run(geometry)?;
        let snapshots = parse_report_file(&report)?;
        debug!(report = %report.display(), snapshots = snapshots.len(), "parsed report");
        check_snapshots(self.phases, geometry, &snapshots, &self.counters)
    }

    pub fn verify_entry(&self, size: u64, associativity: u64) -> EntryReport {
        let result = CacheGeometry::new(size, associativity).and_then(|g| self.verify(&g));
        EntryReport {
            size,
            associativity,
            result,
        }
    }

    pub fn run(&self, sweep: &Sweep) -> SweepReport {
        let mut report = SweepReport::default();
        for (i, (size, associativity)) in sweep.entries().enumerate() {
            info!(size, associativity, "entry {}/{}", i + 1, sweep.len());
            let entry = self.verify_entry(size, associativity);
            let failed = !entry.passed();
            if let Err(e) = &entry.result {
                warn!(size, associativity, error = %e, "entry failed");
            }
            report.entries.push(entry);
            if failed && self.policy == FailurePolicy::FailFast {
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn snapshot(loads: u64, stores: u64, hits: u64, misses: u64) -> Snapshot {
        let names = CounterNames::default();
        Snapshot::from_iter([
            (names.loads, loads as f64),
            (names.stores, stores as f64),
            (names.hits, hits as f64),
            (names.misses, misses as f64),
        ])
    }

    fn matching_snapshots(geometry: &CacheGeometry) -> Vec<Snapshot> {
        TEST_ASSOCIATIVITY
            .iter()
            .map(|spec| {
                let e = spec.expect(geometry);
                snapshot(e.loads, e.stores, e.hits.unwrap_or(0), e.misses.unwrap_or(0))
            })
            .collect()
    }

    #[test]
    fn sweep_is_associativity_major() {
        let sweep = Sweep {
            associativities: vec![1, 2],
            cache_sizes: vec![1024, 2048],
        };
        let entries: Vec<_> = sweep.entries().collect();
        assert_eq!(entries, vec![(1024, 1), (2048, 1), (1024, 2), (2048, 2)]);
        assert_eq!(sweep.len(), 4);
        assert_eq!(Sweep::default().len(), 35);
    }

    #[test]
    fn direct_mapped_only_needs_six_phases() {
        let geometry = CacheGeometry::new(4096, 1).unwrap();
        let snapshots = matching_snapshots(&geometry);
        let verdicts =
            check_snapshots(TEST_ASSOCIATIVITY, &geometry, &snapshots[..6], &CounterNames::default())
                .unwrap();
        assert_eq!(verdicts.len(), 6);
        assert_eq!(verdicts[4].observed.hits, Some(4096));
        assert_eq!(verdicts[4].observed.misses, None);
    }

    #[test]
    fn set_associative_needs_eleven_phases() {
        let geometry = CacheGeometry::new(4096, 4).unwrap();
        let snapshots = matching_snapshots(&geometry);
        let result =
            check_snapshots(TEST_ASSOCIATIVITY, &geometry, &snapshots[..6], &CounterNames::default());
        assert!(matches!(
            result,
            Err(Error::MissingPhase {
                expected: 11,
                found: 6
            })
        ));
    }

    #[test]
    fn first_mismatch_names_phase_and_counter() {
        let geometry = CacheGeometry::new(2048, 2).unwrap();
        let mut snapshots = matching_snapshots(&geometry);
        // one extra miss when overflowing the set, and a wrong store count later
        snapshots[7] = snapshot(1, 0, 0, 2);
        snapshots[8] = snapshot(0, 2, 1, 0);
        match check_snapshots(TEST_ASSOCIATIVITY, &geometry, &snapshots, &CounterNames::default()) {
            Err(Error::Mismatch {
                phase,
                counter,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(phase, 7);
                assert_eq!(counter, CounterKind::Misses);
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unchecked_counter_may_be_absent() {
        let geometry = CacheGeometry::new(1024, 1).unwrap();
        let names = CounterNames::default();
        let mut snapshots = matching_snapshots(&geometry);
        // phase 1 only checks hits
        snapshots[1] = Snapshot::from_iter([
            (names.loads.clone(), 16.0),
            (names.stores.clone(), 0.0),
            (names.hits.clone(), 16.0),
        ]);
        assert!(check_snapshots(TEST_ASSOCIATIVITY, &geometry, &snapshots, &names).is_ok());

        snapshots[0] = Snapshot::from_iter([(names.loads.clone(), 0.0)]);
        match check_snapshots(TEST_ASSOCIATIVITY, &geometry, &snapshots, &names) {
            Err(Error::MissingCounter { phase, name }) => {
                assert_eq!(phase, 0);
                assert_eq!(name, names.stores);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(-1.0)]
    #[case(-0.5)]
    fn corrupt_counter_fails_even_where_zero_is_expected(#[case] value: f64) {
        let geometry = CacheGeometry::new(1024, 1).unwrap();
        let names = CounterNames::default();
        let mut snapshots = matching_snapshots(&geometry);
        // phase 0 expects no loads; a saturating read would turn these into 0
        snapshots[0] = Snapshot::from_iter([
            (names.loads.clone(), value),
            (names.stores.clone(), 16.0),
            (names.misses.clone(), 16.0),
        ]);
        match check_snapshots(TEST_ASSOCIATIVITY, &geometry, &snapshots, &names) {
            Err(Error::InvalidCounter { phase, name, .. }) => {
                assert_eq!(phase, 0);
                assert_eq!(name, names.loads);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn fractional_counter_truncates() {
        let geometry = CacheGeometry::new(1024, 1).unwrap();
        let names = CounterNames::default();
        let mut snapshots = matching_snapshots(&geometry);
        snapshots[0] = Snapshot::from_iter([
            (names.loads.clone(), 0.9),
            (names.stores.clone(), 16.0),
            (names.misses.clone(), 16.0),
        ]);
        assert!(check_snapshots(TEST_ASSOCIATIVITY, &geometry, &snapshots, &names).is_ok());
    }

    #[test]
    fn failure_policy_reads_snake_case() {
        let policy: FailurePolicy = serde_json::from_str("\"full_sweep\"").unwrap();
        assert_eq!(policy, FailurePolicy::FullSweep);
    }
}
