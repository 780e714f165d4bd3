use serde::{Deserialize, Serialize};
use std::fmt;

/// Alternation depths at which a term is constrained, separately for the
/// existential and the universal side. `None` means the term is not
/// constrained on that side.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default, Hash, Serialize, Deserialize)]
pub struct Level {
    pub exists: Option<u32>,
    pub forall: Option<u32>,
}

fn join(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) => Some(a.max(b)),
    }
}

impl Level {
    pub fn unbounded() -> Level {
        Level::default()
    }

    /// The level of a variable bound in the quantifier block at `depth`,
    /// even depths are existential and odd depths universal.
    pub fn of_block(depth: u32) -> Level {
        if depth % 2 == 0 {
            Level {
                exists: Some(depth),
                forall: None,
            }
        } else {
            Level {
                exists: None,
                forall: Some(depth),
            }
        }
    }

    /// Component-wise join, the unbounded side is the identity.
    pub fn merge(&mut self, other: &Level) {
        self.exists = join(self.exists, other.exists);
        self.forall = join(self.forall, other.forall);
    }

    pub fn merged(mut self, other: &Level) -> Level {
        self.merge(other);
        self
    }

    /// The deepest depth on either side, `None` if both are unbounded.
    pub fn max(&self) -> Option<u32> {
        join(self.exists, self.forall)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max().is_none()
    }

    /// Index of the predicate bucket a term with this level is filed in.
    pub fn bucket(&self) -> usize {
        self.max().unwrap_or(0) as usize
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let show = |depth: Option<u32>| match depth {
            None => String::from("-"),
            Some(d) => d.to_string(),
        };
        write!(f, "({},{})", show(self.exists), show(self.forall))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn sample() -> Vec<Level> {
        let mut levels = vec![Level::unbounded()];
        for e in &[None, Some(0), Some(2), Some(4)] {
            for a in &[None, Some(1), Some(3)] {
                levels.push(Level {
                    exists: *e,
                    forall: *a,
                });
            }
        }
        levels
    }

    #[test]
    fn merge_is_commutative_associative_idempotent() {
        let levels = sample();
        for a in &levels {
            assert_eq!(a.merged(a), *a);
            assert_eq!(a.merged(&Level::unbounded()), *a);
            for b in &levels {
                assert_eq!(a.merged(b), b.merged(a));
                for c in &levels {
                    assert_eq!(a.merged(b).merged(c), a.merged(&b.merged(c)));
                }
            }
        }
    }

    #[test]
    fn merge_takes_deepest_depth() {
        let mut level = Level::of_block(0);
        level.merge(&Level::of_block(3));
        level.merge(&Level::of_block(2));
        assert_eq!(level.exists, Some(2));
        assert_eq!(level.forall, Some(3));
        assert_eq!(level.max(), Some(3));
        assert_eq!(level.bucket(), 3);
        assert_eq!(format!("{}", level), "(2,3)");
    }

    #[test]
    fn unbounded_level_is_filed_at_zero() {
        let level = Level::unbounded();
        assert!(level.is_unbounded());
        assert_eq!(level.max(), None);
        assert_eq!(level.bucket(), 0);
        assert_eq!(format!("{}", level), "(-,-)");
    }
}
