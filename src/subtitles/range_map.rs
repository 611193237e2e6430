//! Ordered map from disjoint half-open integer intervals to values

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;

/// Disjoint half-open `usize` intervals, each mapped to a value.
///
/// Gaps are allowed: a point outside every interval has no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeMap<V> {
    /// interval start -> (interval end, value)
    ranges: BTreeMap<usize, (usize, V)>,
}

impl<V> Default for RangeMap<V> {
    fn default() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }
}

impl<V> RangeMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the interval containing `point`
    pub fn get(&self, point: usize) -> Option<&V> {
        self.ranges
            .range(..=point)
            .next_back()
            .filter(|(_, (end, _))| point < *end)
            .map(|(_, (_, value))| value)
    }

    /// Number of intervals
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Intervals in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (Range<usize>, &V)> + '_ {
        self.ranges
            .iter()
            .map(|(start, (end, value))| (*start..*end, value))
    }

    /// From the lowest start to the highest end
    pub fn span(&self) -> Option<Range<usize>> {
        let first = self.ranges.keys().next()?;
        let (last_end, _) = self.ranges.values().next_back()?;
        Some(*first..*last_end)
    }
}

impl<V: Clone> RangeMap<V> {
    /// Maps `range` to `value`. Whatever was mapped inside `range` before is
    /// overwritten; intervals sticking out of it keep their outer parts.
    pub fn insert(&mut self, range: Range<usize>, value: V) {
        if range.start >= range.end {
            return;
        }

        // Intervals are disjoint, so ends grow with starts and we can stop at
        // the first interval that ends before the new one begins.
        let overlapping: Vec<usize> = self
            .ranges
            .range(..range.end)
            .rev()
            .take_while(|(_, (end, _))| *end > range.start)
            .map(|(start, _)| *start)
            .collect();

        for start in overlapping {
            if let Some((end, old)) = self.ranges.remove(&start) {
                if start < range.start {
                    self.ranges.insert(start, (range.start, old.clone()));
                }
                if end > range.end {
                    self.ranges.insert(range.end, (end, old));
                }
            }
        }

        self.ranges.insert(range.start, (range.end, value));
    }

    /// The part of the map inside `range`, with intervals clipped to it
    pub fn restrict(&self, range: Range<usize>) -> RangeMap<V> {
        let mut restricted = RangeMap::new();
        if range.start >= range.end {
            return restricted;
        }

        // the interval that starts before `range` may still reach into it
        let head = self
            .ranges
            .range(..range.start)
            .next_back()
            .filter(|(_, (end, _))| *end > range.start);
        let body = self.ranges.range(range.start..range.end);

        for (start, (end, value)) in head.into_iter().chain(body) {
            let clipped = (*start).max(range.start)..(*end).min(range.end);
            restricted
                .ranges
                .insert(clipped.start, (clipped.end, value.clone()));
        }
        restricted
    }

    /// Restricts to `range` and renumbers so that `range.start` becomes 0
    pub fn sub_map(&self, range: Range<usize>) -> RangeMap<V> {
        let offset = range.start;
        let ranges = self
            .restrict(range)
            .ranges
            .into_iter()
            .map(|(start, (end, value))| (start - offset, (end - offset, value)))
            .collect();
        RangeMap { ranges }
    }
}

impl<V: Clone> FromIterator<(Range<usize>, V)> for RangeMap<V> {
    fn from_iter<I: IntoIterator<Item = (Range<usize>, V)>>(iter: I) -> Self {
        let mut map = RangeMap::new();
        for (range, value) in iter {
            map.insert(range, value);
        }
        map
    }
}

/// `"[lo..hi)"` for half-open keys. Closed `"[lo..hi]"` keys are read too.
fn format_range_key(range: &Range<usize>) -> String {
    format!("[{}..{})", range.start, range.end)
}

fn parse_range_key(key: &str) -> Option<Range<usize>> {
    let inner = key.trim().strip_prefix('[')?;
    let (inner, closed) = match inner.strip_suffix(')') {
        Some(inner) => (inner, false),
        None => (inner.strip_suffix(']')?, true),
    };
    let (lo, hi) = inner.split_once("..")?;
    let lo: usize = lo.trim().parse().ok()?;
    let hi: usize = hi.trim().parse().ok()?;
    let end = if closed { hi.checked_add(1)? } else { hi };
    (lo < end).then_some(lo..end)
}

impl<V: Serialize> Serialize for RangeMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.ranges.len()))?;
        for (start, (end, value)) in &self.ranges {
            map.serialize_entry(&format_range_key(&(*start..*end)), value)?;
        }
        map.end()
    }
}

struct RangeMapVisitor<V>(PhantomData<V>);

impl<'de, V> Visitor<'de> for RangeMapVisitor<V>
where
    V: Deserialize<'de> + Clone,
{
    type Value = RangeMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map with \"[lo..hi)\" keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = RangeMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            let range = parse_range_key(&key)
                .ok_or_else(|| de::Error::custom(format!("invalid range key: {}", key)))?;
            map.insert(range, value);
        }
        Ok(map)
    }
}

impl<'de, V> Deserialize<'de> for RangeMap<V>
where
    V: Deserialize<'de> + Clone,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RangeMapVisitor(PhantomData))
    }
}
