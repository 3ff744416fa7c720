use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::event::Event;
use crate::segment::ProcessedEventsData;

/// Half-open range intersection. A zero-length range is an instant and
/// overlaps any range that contains it.
pub fn ranges_overlap(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    match (a_start == a_end, b_start == b_end) {
        (true, true) => a_start == b_start,
        (true, false) => a_start >= b_start && a_start < b_end,
        (false, true) => b_start >= a_start && b_start < a_end,
        (false, false) => a_start < b_end && b_start < a_end,
    }
}

/// Groups one column's segments into overlap groups and assigns each
/// member a lane. With `allow_overlap` off, conflicting segments are
/// dropped in priority order instead.
#[tracing::instrument(skip(segments), fields(count = segments.len()))]
pub fn calculate_overlapping_events<'a>(
    segments: Vec<ProcessedEventsData<'a>>,
    allow_overlap: bool,
) -> Vec<Vec<ProcessedEventsData<'a>>> {
    if allow_overlap {
        stack_overlapping(segments)
    } else {
        keep_exclusive(segments)
    }
}

fn stack_overlapping(
    mut segments: Vec<ProcessedEventsData<'_>>,
) -> Vec<Vec<ProcessedEventsData<'_>>> {
    segments.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| b.duration().cmp(&a.duration()))
            .then_with(|| a.event.guid.cmp(&b.event.guid))
    });

    let mut groups: Vec<Vec<ProcessedEventsData<'_>>> = Vec::new();
    for segment in segments {
        match groups
            .iter_mut()
            .find(|group| group.iter().any(|member| member.overlaps(&segment)))
        {
            Some(group) => group.push(segment),
            None => groups.push(vec![segment]),
        }
    }

    groups.into_iter().map(assign_lanes).collect()
}

fn assign_lanes(mut group: Vec<ProcessedEventsData<'_>>) -> Vec<ProcessedEventsData<'_>> {
    // End of the current occupant of each lane.
    let mut lanes: Vec<NaiveDateTime> = Vec::new();
    for segment in group.iter_mut() {
        let freed = lanes
            .iter()
            .enumerate()
            .filter(|(_, busy_until)| **busy_until <= segment.start)
            .min_by_key(|(index, busy_until)| (**busy_until, *index))
            .map(|(index, _)| index);
        let busy_until = occupancy_end(segment);
        match freed {
            Some(index) => {
                lanes[index] = busy_until;
                segment.position_index = index;
            }
            None => {
                segment.position_index = lanes.len();
                lanes.push(busy_until);
            }
        }
    }

    let total = lanes.len().max(1);
    for segment in group.iter_mut() {
        segment.total_overlapping = total;
    }
    group
}

// Instants still hold their lane for the moment they mark.
fn occupancy_end(segment: &ProcessedEventsData<'_>) -> NaiveDateTime {
    if segment.end > segment.start {
        segment.end
    } else {
        segment.start + Duration::seconds(1)
    }
}

fn exclusive_priority(a: &ProcessedEventsData<'_>, b: &ProcessedEventsData<'_>) -> Ordering {
    b.event
        .is_all_day
        .cmp(&a.event.is_all_day)
        .then_with(|| b.event.duration().cmp(&a.event.duration()))
        .then_with(|| a.start.cmp(&b.start))
        .then_with(|| a.event.guid.cmp(&b.event.guid))
}

fn keep_exclusive(mut segments: Vec<ProcessedEventsData<'_>>) -> Vec<Vec<ProcessedEventsData<'_>>> {
    segments.sort_by(exclusive_priority);

    let mut pending: Vec<Option<ProcessedEventsData<'_>>> =
        segments.into_iter().map(Some).collect();
    let mut kept = Vec::new();
    for index in 0..pending.len() {
        let Some(mut winner) = pending[index].take() else {
            continue;
        };
        for slot in pending.iter_mut().skip(index + 1) {
            if slot.as_ref().is_some_and(|other| winner.overlaps(other))
                && let Some(hidden) = slot.take()
            {
                debug!(
                    kept = %winner.event.guid,
                    hidden = %hidden.event.guid,
                    "hiding conflicting event"
                );
            }
        }
        winner.position_index = 0;
        winner.total_overlapping = 1;
        kept.push(winner);
    }

    kept.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.event.guid.cmp(&b.event.guid)));
    kept.into_iter().map(|segment| vec![segment]).collect()
}

/// Vertical positions already taken on each date of an all-day row or
/// month grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupiedPositions {
    slots: BTreeMap<NaiveDate, Vec<bool>>,
}

impl OccupiedPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_free(&self, date: NaiveDate, position: usize) -> bool {
        self.slots
            .get(&date)
            .and_then(|slots| slots.get(position))
            .is_none_or(|taken| !*taken)
    }

    /// Returns the map with `position` taken on every date in `dates`.
    #[must_use]
    pub fn occupy(mut self, dates: &[NaiveDate], position: usize) -> Self {
        for date in dates {
            let slots = self.slots.entry(*date).or_default();
            if slots.len() <= position {
                slots.resize(position + 1, false);
            }
            slots[position] = true;
        }
        self
    }

    /// Number of stacked rows needed on `date`.
    pub fn depth(&self, date: NaiveDate) -> usize {
        self.slots
            .get(&date)
            .and_then(|slots| slots.iter().rposition(|taken| *taken))
            .map_or(0, |last| last + 1)
    }
}

/// Lowest position free on all of `dates`.
pub fn find_non_conflicting_position(occupied: &OccupiedPositions, dates: &[NaiveDate]) -> usize {
    (0usize..)
        .find(|position| dates.iter().all(|date| occupied.is_free(*date, *position)))
        .unwrap_or(0)
}

/// Stacks multi-day fragments (all-day row, month cells) so no two
/// fragments sharing a date share a position.
#[tracing::instrument(skip(segments), fields(count = segments.len()))]
pub fn assign_row_positions<'a>(
    mut segments: Vec<ProcessedEventsData<'a>>,
) -> Vec<ProcessedEventsData<'a>> {
    segments.sort_by(|a, b| {
        a.date()
            .cmp(&b.date())
            .then_with(|| b.span().cmp(&a.span()))
            .then_with(|| b.duration().cmp(&a.duration()))
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.event.guid.cmp(&b.event.guid))
    });

    let (occupied, mut placed) = segments.into_iter().fold(
        (OccupiedPositions::new(), Vec::new()),
        |(occupied, mut placed), mut segment| {
            let position = find_non_conflicting_position(&occupied, &segment.dates);
            let occupied = occupied.occupy(&segment.dates, position);
            segment.position_index = position;
            placed.push(segment);
            (occupied, placed)
        },
    );

    for segment in placed.iter_mut() {
        segment.total_overlapping = segment
            .dates
            .iter()
            .map(|date| occupied.depth(*date))
            .max()
            .unwrap_or(1)
            .max(1);
    }
    placed
}

/// Conflicts a candidate placement would create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub overlapping: Vec<Uuid>,
    pub blocked: Vec<Uuid>,
}

impl Availability {
    pub fn is_clear(&self) -> bool {
        self.overlapping.is_empty() && self.blocked.is_empty()
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocked.is_empty()
    }

    pub fn is_overlapping(&self) -> bool {
        !self.overlapping.is_empty()
    }
}

/// Checks a candidate against every other event. Blocked intervals
/// always conflict; ordinary events conflict only when overlap is off.
#[tracing::instrument(skip(candidate, events), fields(guid = %candidate.guid))]
pub fn check_availability(
    candidate: &Event,
    events: &[Event],
    allow_overlap: bool,
) -> Availability {
    let (start, end) = candidate.effective_range();
    let mut availability = Availability::default();
    for other in events.iter().filter(|other| other.guid != candidate.guid) {
        let (other_start, other_end) = other.effective_range();
        if !ranges_overlap(start, end, other_start, other_end) {
            continue;
        }
        if other.is_block || candidate.is_block {
            availability.blocked.push(other.guid);
        } else if !allow_overlap {
            availability.overlapping.push(other.guid);
        }
    }
    debug!(
        blocked = availability.blocked.len(),
        overlapping = availability.overlapping.len(),
        "checked availability"
    );
    availability
}

/// Every pair of events whose ranges intersect, in input order.
pub fn find_conflicts(events: &[Event]) -> Vec<(Uuid, Uuid)> {
    let mut conflicts = Vec::new();
    for (index, event) in events.iter().enumerate() {
        let (start, end) = event.effective_range();
        for other in &events[index + 1..] {
            let (other_start, other_end) = other.effective_range();
            if ranges_overlap(start, end, other_start, other_end) {
                conflicts.push((event.guid, other.guid));
            }
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::calendar::add_days;
    use crate::segment::split_event_by_day;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn at(h: u32, min: u32) -> NaiveDateTime {
        date(2026, 2, 16).and_hms_opt(h, min, 0).expect("valid time")
    }

    fn segments_for(events: &[Event]) -> Vec<ProcessedEventsData<'_>> {
        let dates = [date(2026, 2, 16)];
        events
            .iter()
            .flat_map(|event| split_event_by_day(event, &dates))
            .collect()
    }

    #[test]
    fn instants_overlap_containing_ranges() {
        assert!(ranges_overlap(at(9, 0), at(9, 0), at(9, 0), at(10, 0)));
        assert!(!ranges_overlap(at(10, 0), at(10, 0), at(9, 0), at(10, 0)));
        assert!(!ranges_overlap(at(9, 0), at(10, 0), at(10, 0), at(11, 0)));
        assert!(ranges_overlap(at(9, 0), at(10, 30), at(10, 0), at(11, 0)));
    }

    #[test]
    fn two_overlapping_events_share_width() {
        let events = vec![
            Event::new("standup", at(9, 0), at(10, 0)),
            Event::new("review", at(9, 30), at(10, 30)),
        ];
        let groups = calculate_overlapping_events(segments_for(&events), true);

        assert_eq!(groups.len(), 1);
        let positions: Vec<usize> = groups[0].iter().map(|s| s.position_index).collect();
        assert_eq!(positions, vec![0, 1]);
        assert!(groups[0].iter().all(|s| s.total_overlapping == 2));
    }

    #[test]
    fn freed_lane_is_reused() {
        let events = vec![
            Event::new("a", at(9, 0), at(10, 0)),
            Event::new("b", at(9, 0), at(12, 0)),
            Event::new("c", at(10, 0), at(11, 0)),
        ];
        let groups = calculate_overlapping_events(segments_for(&events), true);

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.len(), 3);
        assert!(group.iter().all(|s| s.total_overlapping == 2));
        let lane_of = |subject: &str| {
            group
                .iter()
                .find(|s| s.event.subject == subject)
                .map(|s| s.position_index)
        };
        assert_eq!(lane_of("b"), Some(0));
        assert_eq!(lane_of("a"), Some(1));
        assert_eq!(lane_of("c"), Some(1));
    }

    #[test]
    fn touching_events_form_separate_groups() {
        let events = vec![
            Event::new("a", at(9, 0), at(10, 0)),
            Event::new("b", at(10, 0), at(11, 0)),
        ];
        let groups = calculate_overlapping_events(segments_for(&events), true);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().flatten().all(|s| s.total_overlapping == 1));
    }

    #[test]
    fn exclusive_mode_keeps_longest() {
        let events = vec![
            Event::new("short", at(9, 0), at(9, 30)),
            Event::new("long", at(9, 0), at(11, 0)),
            Event::new("later", at(11, 0), at(12, 0)),
        ];
        let groups = calculate_overlapping_events(segments_for(&events), false);
        let subjects: Vec<&str> = groups
            .iter()
            .flatten()
            .map(|s| s.event.subject.as_str())
            .collect();
        assert_eq!(subjects, vec!["long", "later"]);
    }

    #[test]
    fn row_positions_avoid_shared_dates() {
        let events = vec![
            Event::all_day("trip", date(2026, 2, 16), date(2026, 2, 18)),
            Event::all_day("holiday", date(2026, 2, 17), date(2026, 2, 17)),
            Event::all_day("launch", date(2026, 2, 19), date(2026, 2, 19)),
        ];
        let dates: Vec<NaiveDate> = (0..7)
            .map(|offset| add_days(date(2026, 2, 16), offset))
            .collect();
        let segments: Vec<ProcessedEventsData<'_>> = events
            .iter()
            .map(|event| {
                let mut segment = ProcessedEventsData::whole(event, event.start.date());
                segment.dates = dates
                    .iter()
                    .copied()
                    .filter(|d| *d >= event.start.date() && *d <= event.last_day())
                    .collect();
                segment
            })
            .collect();

        let placed = assign_row_positions(segments);
        let position = |subject: &str| {
            placed
                .iter()
                .find(|s| s.event.subject == subject)
                .map(|s| (s.position_index, s.total_overlapping))
        };
        assert_eq!(position("trip"), Some((0, 2)));
        assert_eq!(position("holiday"), Some((1, 2)));
        assert_eq!(position("launch"), Some((0, 1)));
    }

    #[test]
    fn occupied_positions_fold() {
        let monday = date(2026, 2, 16);
        let tuesday = date(2026, 2, 17);
        let occupied = OccupiedPositions::new()
            .occupy(&[monday, tuesday], 0)
            .occupy(&[tuesday], 1);
        assert_eq!(find_non_conflicting_position(&occupied, &[monday]), 1);
        assert_eq!(find_non_conflicting_position(&occupied, &[monday, tuesday]), 2);
        assert_eq!(occupied.depth(tuesday), 2);
    }

    #[test]
    fn availability_reports_blocks_and_overlaps() {
        let events = vec![
            Event::new("lunch", at(12, 0), at(13, 0)).blocking(),
            Event::new("sync", at(14, 0), at(15, 0)),
        ];
        let candidate = Event::new("focus", at(12, 30), at(14, 30));

        let strict = check_availability(&candidate, &events, false);
        assert_eq!(strict.blocked, vec![events[0].guid]);
        assert_eq!(strict.overlapping, vec![events[1].guid]);

        let relaxed = check_availability(&candidate, &events, true);
        assert!(relaxed.is_blocked());
        assert!(!relaxed.is_overlapping());
    }

    #[test]
    fn availability_ignores_candidate_itself() {
        let event = Event::new("sync", at(14, 0), at(15, 0));
        let events = vec![event.clone()];
        assert!(check_availability(&event, &events, false).is_clear());
    }

    #[test]
    fn conflicts_list_each_pair_once() {
        let events = vec![
            Event::new("a", at(9, 0), at(10, 0)),
            Event::new("b", at(9, 30), at(11, 0)),
            Event::new("c", at(10, 30), at(12, 0)),
        ];
        let conflicts = find_conflicts(&events);
        assert_eq!(
            conflicts,
            vec![(events[0].guid, events[1].guid), (events[1].guid, events[2].guid)]
        );
    }

    fn arbitrary_events() -> impl Strategy<Value = Vec<Event>> {
        prop::collection::vec((0i64..(20 * 60), 0i64..240), 1..12).prop_map(|spans| {
            spans
                .into_iter()
                .map(|(offset, length)| {
                    let start = at(0, 0) + Duration::minutes(offset);
                    Event::new("sample", start, start + Duration::minutes(length))
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn overlapping_segments_never_share_a_lane(events in arbitrary_events()) {
            let groups = calculate_overlapping_events(segments_for(&events), true);
            let placed: Vec<&ProcessedEventsData<'_>> = groups.iter().flatten().collect();
            prop_assert_eq!(placed.len(), events.len());
            for (index, a) in placed.iter().enumerate() {
                prop_assert!(a.position_index < a.total_overlapping);
                for b in &placed[index + 1..] {
                    if a.overlaps(b) {
                        prop_assert_ne!(a.position_index, b.position_index);
                    }
                }
            }
        }

        #[test]
        fn exclusive_mode_keeps_disjoint_events(events in arbitrary_events()) {
            let groups = calculate_overlapping_events(segments_for(&events), false);
            let kept: Vec<&ProcessedEventsData<'_>> = groups.iter().flatten().collect();
            prop_assert!(!kept.is_empty());
            for (index, a) in kept.iter().enumerate() {
                for b in &kept[index + 1..] {
                    prop_assert!(!a.overlaps(b));
                }
            }
        }

        #[test]
        fn layout_is_idempotent(events in arbitrary_events()) {
            let first = calculate_overlapping_events(segments_for(&events), true);
            let second = calculate_overlapping_events(segments_for(&events), true);
            prop_assert_eq!(first, second);
        }
    }
}
