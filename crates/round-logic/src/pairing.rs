//! Group formation from a pool of waiting participants
//!
//! Draws are uniform and go through [`Randomness`] so a seeded session
//! always forms the same groups.

use crate::random::Randomness;

/// Floyd's algorithm: sample `m` distinct indices from [0, n), sorted.
pub fn sample_indices<R: Randomness>(n: usize, m: usize, rng: &mut R) -> Vec<usize> {
    let m = m.min(n);
    let mut result: Vec<usize> = Vec::with_capacity(m);

    for j in (n - m)..n {
        let t = rng.next_range(j as u32 + 1) as usize; // uniform in [0, j]
        if result.contains(&t) {
            result.push(j);
        } else {
            result.push(t);
        }
    }

    result.sort_unstable();
    result
}

/// Draw one group of `size` from `pool` without replacement.
///
/// Returns (selected, left_over), or `None` when the pool is too small.
/// Seat order inside the group is shuffled as well.
pub fn pick_group<T: Clone, R: Randomness>(
    pool: &[T],
    size: usize,
    rng: &mut R,
) -> Option<(Vec<T>, Vec<T>)> {
    if size == 0 || pool.len() < size {
        return None;
    }

    let chosen = sample_indices(pool.len(), size, rng);
    let mut selected = Vec::with_capacity(size);
    let mut rest = Vec::with_capacity(pool.len() - size);
    for (i, item) in pool.iter().enumerate() {
        if chosen.binary_search(&i).is_ok() {
            selected.push(item.clone());
        } else {
            rest.push(item.clone());
        }
    }
    rng.shuffle(&mut selected);

    Some((selected, rest))
}

/// Random shuffle + consecutive grouping. Participants that do not fill a
/// whole group are returned separately.
pub fn form_groups<T, R: Randomness>(mut ids: Vec<T>, size: usize, rng: &mut R) -> (Vec<Vec<T>>, Vec<T>) {
    if size == 0 {
        return (Vec::new(), ids);
    }
    rng.shuffle(&mut ids);

    let full = ids.len() / size * size;
    let leftover = ids.split_off(full);
    let mut groups = Vec::with_capacity(full / size);
    let mut iter = ids.into_iter();
    for _ in 0..full / size {
        groups.push(iter.by_ref().take(size).collect());
    }
    (groups, leftover)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRng;
    use std::collections::HashSet;

    #[test]
    fn test_floyd_sample_properties() {
        let mut rng = SeededRng::from_u64(42);
        for (n, m) in [(2usize, 2usize), (10, 3), (100, 50), (5, 9)] {
            let sample = sample_indices(n, m, &mut rng);
            assert_eq!(sample.len(), m.min(n), "n={}, m={}", n, m);
            assert!(sample.iter().all(|i| *i < n));
            for w in sample.windows(2) {
                assert!(w[1] > w[0], "duplicate index at n={}, m={}", n, m);
            }
        }
    }

    #[test]
    fn test_pick_group_too_small() {
        let mut rng = SeededRng::from_u64(1);
        assert!(pick_group(&["a"], 2, &mut rng).is_none());
        assert!(pick_group(&["a", "b"], 0, &mut rng).is_none());
    }

    #[test]
    fn test_pick_group_partitions_pool() {
        let mut rng = SeededRng::from_u64(1);
        let pool = ["a", "b", "c", "d", "e"];
        let (selected, rest) = pick_group(&pool, 2, &mut rng).unwrap();

        assert_eq!(selected.len(), 2);
        assert_eq!(rest.len(), 3);
        let all: HashSet<_> = selected.iter().chain(rest.iter()).collect();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_pick_group_is_roughly_uniform() {
        let mut rng = SeededRng::from_u64(77);
        let pool = [0usize, 1, 2, 3];
        let mut hits = [0u32; 4];
        for _ in 0..4000 {
            let (selected, _) = pick_group(&pool, 2, &mut rng).unwrap();
            for s in selected {
                hits[s] += 1;
            }
        }
        // each member expected 2000 times
        for h in hits {
            assert!(h > 1700 && h < 2300, "skewed draw: {:?}", hits);
        }
    }

    #[test]
    fn test_form_groups_pairs() {
        let mut rng = SeededRng::from_u64(5);
        let (groups, leftover) = form_groups((0..7).collect::<Vec<u32>>(), 2, &mut rng);

        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.len() == 2));
        assert_eq!(leftover.len(), 1);

        let mut seen: Vec<u32> = groups.into_iter().flatten().chain(leftover).collect();
        seen.sort();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_form_groups_determinism() {
        let a = form_groups((0..10).collect::<Vec<u32>>(), 2, &mut SeededRng::from_u64(8));
        let b = form_groups((0..10).collect::<Vec<u32>>(), 2, &mut SeededRng::from_u64(8));
        assert_eq!(a, b);
    }
}
