//! Expected cache behaviour for the `test_associativity` workload.
//!
//! The workload runs as a fixed list of phases. Each phase issues one kind of
//! access over a footprint derived from the cache geometry, and every access
//! in it is expected to either hit or miss. The counts below are the contract
//! a correct LRU set-associative L1 has to meet.

use std::fmt;

use crate::error::{Error, Result};

/// Line size used by the lab's cache hierarchy.
pub const LINE_SIZE: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    size: u64,
    associativity: u64,
    line_size: u64,
}

impl CacheGeometry {
    pub fn new(size: u64, associativity: u64) -> Result<Self> {
        Self::with_line_size(size, associativity, LINE_SIZE)
    }

    pub fn with_line_size(size: u64, associativity: u64, line_size: u64) -> Result<Self> {
        let invalid = Error::InvalidGeometry {
            size,
            associativity,
            line_size,
        };
        if size == 0 || associativity == 0 || line_size == 0 || size % line_size != 0 {
            return Err(invalid);
        }
        let lines = size / line_size;
        if lines % associativity != 0 || lines < associativity {
            return Err(invalid);
        }
        Ok(CacheGeometry {
            size,
            associativity,
            line_size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn associativity(&self) -> u64 {
        self.associativity
    }

    pub fn line_size(&self) -> u64 {
        self.line_size
    }

    pub fn num_lines(&self) -> u64 {
        self.size / self.line_size
    }

    pub fn num_sets(&self) -> u64 {
        self.num_lines() / self.associativity
    }

    pub fn is_direct_mapped(&self) -> bool {
        self.associativity == 1
    }
}

impl fmt::Display for CacheGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes, {}-way", self.size, self.associativity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
}

/// Which addresses a phase touches, expressed by how many accesses it makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Footprint {
    /// One access per cache line.
    EveryLine,
    /// One access per byte of capacity.
    EveryByte,
    /// One access to each resident way of a set except the oldest.
    OtherWays,
    /// A single access.
    SingleLine,
}

impl Footprint {
    pub fn accesses(self, geometry: &CacheGeometry) -> u64 {
        match self {
            Footprint::EveryLine => geometry.num_lines(),
            Footprint::EveryByte => geometry.size(),
            Footprint::OtherWays => geometry.associativity() - 1,
            Footprint::SingleLine => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requires {
    AnyGeometry,
    /// Skipped on direct-mapped caches, which have no ordering within a set.
    SetAssociative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSpec {
    pub label: &'static str,
    pub access: Access,
    pub footprint: Footprint,
    pub outcome: Outcome,
    pub requires: Requires,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedPhase {
    pub loads: u64,
    pub stores: u64,
    /// `None` when the phase does not constrain the counter.
    pub hits: Option<u64>,
    pub misses: Option<u64>,
}

impl PhaseSpec {
    const fn new(
        label: &'static str,
        access: Access,
        footprint: Footprint,
        outcome: Outcome,
        requires: Requires,
    ) -> Self {
        PhaseSpec {
            label,
            access,
            footprint,
            outcome,
            requires,
        }
    }

    pub fn applies_to(&self, geometry: &CacheGeometry) -> bool {
        match self.requires {
            Requires::AnyGeometry => true,
            Requires::SetAssociative => !geometry.is_direct_mapped(),
        }
    }

    pub fn expect(&self, geometry: &CacheGeometry) -> ExpectedPhase {
        let n = self.footprint.accesses(geometry);
        let (loads, stores) = match self.access {
            Access::Load => (n, 0),
            Access::Store => (0, n),
        };
        let (hits, misses) = match self.outcome {
            Outcome::Hit => (Some(n), None),
            Outcome::Miss => (None, Some(n)),
        };
        ExpectedPhase {
            loads,
            stores,
            hits,
            misses,
        }
    }
}

use Access::{Load, Store};
use Footprint::{EveryByte, EveryLine, OtherWays, SingleLine};
use Outcome::{Hit, Miss};
use Requires::{AnyGeometry, SetAssociative};

/// Phases of `test_associativity`, in the order the simulator dumps them.
pub const TEST_ASSOCIATIVITY: &[PhaseSpec] = &[
    PhaseSpec::new("cold fill", Store, EveryLine, Miss, AnyGeometry),
    PhaseSpec::new("immediate re-read", Load, EveryLine, Hit, AnyGeometry),
    PhaseSpec::new("conflicting fill", Store, EveryLine, Miss, AnyGeometry),
    PhaseSpec::new("re-read after conflict", Load, EveryLine, Miss, AnyGeometry),
    PhaseSpec::new("sequential byte sweep", Load, EveryByte, Hit, AnyGeometry),
    PhaseSpec::new("re-read after sweep", Load, EveryLine, Miss, AnyGeometry),
    PhaseSpec::new("probe resident ways", Load, OtherWays, Hit, SetAssociative),
    PhaseSpec::new("overflow the set", Load, SingleLine, Miss, SetAssociative),
    PhaseSpec::new("store to reloaded line", Store, SingleLine, Hit, SetAssociative),
    PhaseSpec::new("load reloaded line", Load, SingleLine, Hit, SetAssociative),
    PhaseSpec::new("force eviction", Load, SingleLine, Miss, SetAssociative),
];

pub fn expected_phase(geometry: &CacheGeometry, phase: usize) -> Option<ExpectedPhase> {
    TEST_ASSOCIATIVITY.get(phase).map(|spec| spec.expect(geometry))
}

/// Phases that apply to `geometry`, with their index in the report.
pub fn expected_phases(
    phases: &'static [PhaseSpec],
    geometry: &CacheGeometry,
) -> Vec<(usize, &'static PhaseSpec, ExpectedPhase)> {
    phases
        .iter()
        .enumerate()
        .filter(|(_, spec)| spec.applies_to(geometry))
        .map(|(i, spec)| (i, spec, spec.expect(geometry)))
        .collect()
}
