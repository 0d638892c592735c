//! Set-associative LRU cache used as a reference model for the oracle.

use crate::oracle::{CacheGeometry, Outcome};

#[derive(Debug)]
pub struct LruCache {
    line_size: u64,
    sets: Vec<CacheSet>,
}

#[derive(Debug)]
struct CacheSet {
    // each way holds the line address it caches
    ways: Vec<Option<u64>>,
    // least recently used first
    lru_order: Vec<usize>,
}

impl CacheSet {
    fn new(associativity: usize) -> Self {
        CacheSet {
            ways: vec![None; associativity],
            lru_order: Vec::with_capacity(associativity),
        }
    }

    fn access(&mut self, tag: u64) -> Outcome {
        if let Some(pos) = self.ways.iter().position(|&way| way == Some(tag)) {
            self.touch(pos);
            return Outcome::Hit;
        }

        let way = match self.ways.iter().position(Option::is_none) {
            Some(free) => free,
            None => self.lru_order.remove(0),
        };
        self.ways[way] = Some(tag);
        self.touch(way);
        Outcome::Miss
    }

    fn touch(&mut self, way: usize) {
        self.lru_order.retain(|&i| i != way);
        self.lru_order.push(way);
    }
}

impl LruCache {
    pub fn new(geometry: &CacheGeometry) -> Self {
        let sets = (0..geometry.num_sets())
            .map(|_| CacheSet::new(geometry.associativity() as usize))
            .collect();
        LruCache {
            line_size: geometry.line_size(),
            sets,
        }
    }

    /// Loads and stores behave the same: a store miss allocates the line.
    pub fn access(&mut self, address: u64) -> Outcome {
        let line = address / self.line_size;
        let set = (line % self.sets.len() as u64) as usize;
        self.sets[set].access(line)
    }

    pub fn contains(&self, address: u64) -> bool {
        let line = address / self.line_size;
        let set = (line % self.sets.len() as u64) as usize;
        self.sets[set].ways.contains(&Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_touch_of_a_line_hits() {
        let mut cache = LruCache::new(&CacheGeometry::new(1024, 2).unwrap());
        assert_eq!(cache.access(0x100), Outcome::Miss);
        assert_eq!(cache.access(0x100), Outcome::Hit);
        assert_eq!(cache.access(0x13f), Outcome::Hit);
        assert_eq!(cache.access(0x140), Outcome::Miss);
    }

    #[test]
    fn direct_mapped_conflict_evicts() {
        // 16 sets, so addresses 1024 bytes apart share a set
        let mut cache = LruCache::new(&CacheGeometry::new(1024, 1).unwrap());
        assert_eq!(cache.access(0), Outcome::Miss);
        assert_eq!(cache.access(1024), Outcome::Miss);
        assert!(!cache.contains(0));
        assert_eq!(cache.access(0), Outcome::Miss);
    }

    #[test]
    fn least_recently_used_way_is_evicted() {
        // 2-way, 8 sets: stride 512 maps to set 0
        let mut cache = LruCache::new(&CacheGeometry::new(1024, 2).unwrap());
        cache.access(0);
        cache.access(512);
        cache.access(0);
        assert_eq!(cache.access(1024), Outcome::Miss);
        assert!(cache.contains(0));
        assert!(!cache.contains(512));
    }
}
