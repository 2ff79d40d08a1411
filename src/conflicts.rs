//! Time-slot conflict counting.
//!
//! A conflict is an exact `(start, end)` slot shared by more than one item.
//! Each such slot counts once, whatever the number of items in it. Partially
//! overlapping or back-to-back slots are not conflicts; this is the defined
//! meaning of `conflict_count`, not an approximation of interval overlap.

use std::collections::HashMap;

pub fn count_conflicts<I>(slots: I) -> usize
where
    I: IntoIterator<Item = (i64, i64)>,
{
    let mut seen: HashMap<(i64, i64), usize> = HashMap::new();
    for slot in slots {
        *seen.entry(slot).or_insert(0) += 1;
    }
    seen.values().filter(|&&n| n > 1).count()
}
