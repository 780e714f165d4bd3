use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::cmp::{Eq, Ord};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Event counters, e.g., number of search rounds or projections.
#[derive(Debug, Clone)]
pub struct CountingStats<E>
where
    E: Eq + Hash + Ord,
{
    values: FxHashMap<E, usize>,
}

impl<E: Hash + Eq + Ord> Default for CountingStats<E> {
    fn default() -> Self {
        Self {
            values: FxHashMap::default(),
        }
    }
}

impl<E: Hash + Eq + Ord> CountingStats<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, value: &E) -> usize {
        *self.values.get(value).unwrap_or(&0)
    }

    pub fn inc(&mut self, value: E) {
        let val = self.values.entry(value).or_insert(0);
        *val += 1;
    }

    pub fn inc_by(&mut self, value: E, val: usize) {
        let val_entry = self.values.entry(value).or_insert(0);
        *val_entry += val;
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl<E: fmt::Display + Hash + Eq + Ord + Copy> fmt::Display for CountingStats<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut vals: Vec<_> = self.values.keys().collect();
        vals.sort();
        for event in &vals {
            writeln!(f, "{}\t{}", event, self.get(*event))?;
        }
        Ok(())
    }
}

type TimingStatsValues<E> = FxHashMap<E, Vec<Duration>>;

pub struct Timer<E>
where
    E: Eq + Hash + Copy,
{
    pointer: Rc<RefCell<TimingStatsValues<E>>>,
    phase: E,
    begin: Instant,
    stopped: bool,
}

impl<E: Eq + Hash + Copy> Timer<E> {
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        let duration = self.begin.elapsed();
        let mut values = self.pointer.borrow_mut();
        let e = values.entry(self.phase).or_insert_with(Vec::new);
        e.push(duration);
        self.stopped = true;
    }
}

impl<E: Eq + Hash + Copy> Drop for Timer<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wall-clock durations of solver phases; a phase is measured by a `Timer`
/// that records on `stop` or when dropped.
pub struct TimingStats<E>
where
    E: Eq + Hash + Copy,
{
    pointer: Rc<RefCell<TimingStatsValues<E>>>,
}

impl<E: Eq + Hash + Copy> Default for TimingStats<E> {
    fn default() -> Self {
        Self {
            pointer: Rc::new(RefCell::new(FxHashMap::default())),
        }
    }
}

impl<E: Eq + Hash + Copy> TimingStats<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, phase: E) -> Timer<E> {
        Timer {
            pointer: self.pointer.clone(),
            phase,
            begin: Instant::now(),
            stopped: false,
        }
    }

    pub fn count(&self, phase: E) -> usize {
        let values = self.pointer.borrow();
        values.get(&phase).map_or(0, Vec::len)
    }

    pub fn sum(&self, phase: E) -> Duration {
        let values = self.pointer.borrow();
        values
            .get(&phase)
            .map_or_else(|| Duration::new(0, 0), |v| v.iter().sum())
    }

    pub fn avg(&self, phase: E) -> Duration {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.count(phase) as u32;
        if count == 0 {
            return Duration::new(0, 0);
        }
        self.sum(phase) / count
    }

    pub fn min(&self, phase: E) -> Duration {
        let values = self.pointer.borrow();
        values
            .get(&phase)
            .and_then(|v| v.iter().min().copied())
            .unwrap_or_else(|| Duration::new(0, 0))
    }

    pub fn max(&self, phase: E) -> Duration {
        let values = self.pointer.borrow();
        values
            .get(&phase)
            .and_then(|v| v.iter().max().copied())
            .unwrap_or_else(|| Duration::new(0, 0))
    }
}

impl<E: Eq + Hash + Copy + Ord + fmt::Display> fmt::Display for TimingStats<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut phases: Vec<E> = self.pointer.borrow().keys().copied().collect();
        phases.sort();
        for stat in phases {
            let sum = self.sum(stat);
            let avg = self.avg(stat);
            let min = self.min(stat);
            let max = self.max(stat);
            writeln!(
                f,
                "  {} count {}  sum {}.{:03}  avg: {}.{:03}  min {}.{:03}  max {}.{:03}",
                stat,
                self.count(stat),
                sum.as_secs(),
                sum.subsec_millis(),
                avg.as_secs(),
                avg.subsec_millis(),
                min.as_secs(),
                min.subsec_millis(),
                max.as_secs(),
                max.subsec_millis()
            )?;
        }
        Ok(())
    }
}
