//! Time-indexed resource curves

use gpuslot_core::Resource;
use std::collections::BTreeMap;

/// Resource demand over time, sampled at a fixed step.
///
/// The value stored at instant `t` (a multiple of `step`) covers
/// `[t, t + step)`. Instants with no demand are not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCurve {
    step: i64,
    points: BTreeMap<i64, Resource>,
}

impl ResourceCurve {
    /// Empty curve with the given step in milliseconds
    pub fn new(step: i64) -> Self {
        Self {
            step: step.max(1),
            points: BTreeMap::new(),
        }
    }

    /// Sample possibly overlapping `(start, end, resource)` intervals.
    ///
    /// Overlapping intervals add up. When demand changes inside one step the
    /// sample is the component-wise maximum over that step, so the curve
    /// never under-reports demand.
    pub fn from_intervals<I>(step: i64, intervals: I) -> Self
    where
        I: IntoIterator<Item = (i64, i64, Resource)>,
    {
        let mut curve = Self::new(step);

        let mut events: BTreeMap<i64, Resource> = BTreeMap::new();
        for (start, end, resource) in intervals {
            if start >= end || resource.is_none() {
                continue;
            }
            *events.entry(start).or_default() += resource;
            *events.entry(end).or_default() -= resource;
        }

        let mut level = Resource::NONE;
        let mut instants = events.into_iter().peekable();
        while let Some((at, delta)) = instants.next() {
            level += delta;
            let Some(&(until, _)) = instants.peek() else {
                break;
            };
            if level.is_none() {
                continue;
            }
            let mut bucket = Some(curve.align(at));
            while let Some(instant) = bucket.filter(|b| *b < until) {
                let point = curve.points.entry(instant).or_default();
                *point = point.component_wise_max(&level);
                bucket = instant.checked_add(curve.step);
            }
        }
        curve
    }

    /// Sampling step in milliseconds
    pub fn step(&self) -> i64 {
        self.step
    }

    /// Start of the step containing `instant`
    pub fn align(&self, instant: i64) -> i64 {
        instant.div_euclid(self.step) * self.step
    }

    /// Demand at `instant`
    pub fn at(&self, instant: i64) -> Resource {
        self.points
            .get(&self.align(instant))
            .copied()
            .unwrap_or(Resource::NONE)
    }

    /// Whether the curve carries no demand at all
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of stored steps
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Stored steps in time order
    pub fn iter(&self) -> impl Iterator<Item = (i64, Resource)> + '_ {
        self.points.iter().map(|(t, r)| (*t, *r))
    }

    /// Stored steps overlapping `[start, end)`
    pub fn range(&self, start: i64, end: i64) -> impl Iterator<Item = (i64, Resource)> + '_ {
        let from = self.align(start);
        let to = end.max(from);
        self.points.range(from..to).map(|(t, r)| (*t, *r))
    }

    /// Add `other` point by point
    pub fn add(&mut self, other: &ResourceCurve) {
        self.merge(other, |point, value| *point += value);
    }

    /// Subtract `other` point by point
    pub fn subtract(&mut self, other: &ResourceCurve) {
        self.merge(other, |point, value| *point -= value);
    }

    fn merge(&mut self, other: &ResourceCurve, apply: impl Fn(&mut Resource, Resource)) {
        debug_assert_eq!(self.step, other.step, "curves must share a step");
        for (instant, value) in other.iter() {
            let point = self.points.entry(instant).or_default();
            apply(point, value);
            if point.is_none() {
                self.points.remove(&instant);
            }
        }
    }
}
