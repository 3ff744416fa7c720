use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::calendar::{add_days, midnight};
use crate::event::Event;
use crate::geometry::EventGeometry;
use crate::overlap::ranges_overlap;

/// One day- or week-row-clipped fragment of an event, rebuilt on every
/// layout pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedEventsData<'a> {
    pub event: &'a Event,
    pub key: String,
    /// Render dates covered by this fragment, in order.
    pub dates: Vec<NaiveDate>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub is_first_day: bool,
    pub is_last_day: bool,
    pub is_first_segment_in_render_range: bool,
    pub is_last_segment_in_render_range: bool,
    pub segment_index: usize,
    pub total_segments: usize,
    /// Index of the first covered date within its rendered row.
    pub column: usize,
    pub overflow_left: bool,
    pub overflow_right: bool,
    pub position_index: usize,
    pub total_overlapping: usize,
    pub geometry: Option<EventGeometry>,
}

impl<'a> ProcessedEventsData<'a> {
    fn new(event: &'a Event, date: NaiveDate, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            event,
            key: segment_key(date, event),
            dates: vec![date],
            start,
            end,
            is_first_day: true,
            is_last_day: true,
            is_first_segment_in_render_range: true,
            is_last_segment_in_render_range: true,
            segment_index: 0,
            total_segments: 1,
            column: 0,
            overflow_left: false,
            overflow_right: false,
            position_index: 0,
            total_overlapping: 1,
            geometry: None,
        }
    }

    /// Whole event as a single fragment placed on `date`.
    pub fn whole(event: &'a Event, date: NaiveDate) -> Self {
        let (start, end) = event.effective_range();
        Self::new(event, date, start, end)
    }

    pub fn date(&self) -> NaiveDate {
        self.dates.first().copied().unwrap_or_else(|| self.start.date())
    }

    pub fn span(&self) -> usize {
        self.dates.len().max(1)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &ProcessedEventsData<'_>) -> bool {
        ranges_overlap(self.start, self.end, other.start, other.end)
    }
}

/// Rendering key: visible date plus event id, so a repeated event on
/// several days never collides with itself.
pub fn segment_key(date: NaiveDate, event: &Event) -> String {
    let id = event
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| event.guid.simple().to_string());
    format!("{}_{}", date.format("%Y%m%d"), id)
}

/// Splits an event into one fragment per rendered day it touches.
#[tracing::instrument(skip(event, render_dates), fields(guid = %event.guid))]
pub fn split_event_by_day<'a>(
    event: &'a Event,
    render_dates: &[NaiveDate],
) -> Vec<ProcessedEventsData<'a>> {
    let first_day = event.start.date();
    let last_day = event.last_day();
    let (range_start, range_end) = event.effective_range();
    let total_segments = event.days_count() as usize;

    let mut segments: Vec<ProcessedEventsData<'a>> = render_dates
        .iter()
        .enumerate()
        .filter(|(_, date)| **date >= first_day && **date <= last_day)
        .map(|(column, date)| {
            let date = *date;
            let start = if date == first_day { range_start } else { midnight(date) };
            let end = if date == last_day {
                range_end
            } else {
                midnight(add_days(date, 1))
            };
            let mut segment = ProcessedEventsData::new(event, date, start, end);
            segment.column = column;
            segment.is_first_day = date == first_day;
            segment.is_last_day = date == last_day;
            segment.segment_index = (date - first_day).num_days() as usize;
            segment.total_segments = total_segments;
            segment
        })
        .collect();

    mark_render_range(&mut segments);
    tracing::trace!(count = segments.len(), total_segments, "split event by day");
    segments
}

/// Clips an event to each week row it touches; each row is the window
/// `[first date, last date + 1 day)`.
#[tracing::instrument(skip(week_rows, event), fields(guid = %event.guid))]
pub fn split_event_by_week<'a>(
    week_rows: &[Vec<NaiveDate>],
    event: &'a Event,
) -> Vec<ProcessedEventsData<'a>> {
    let first_day = event.start.date();
    let last_day = event.last_day();
    let (range_start, range_end) = event.effective_range();

    let mut segments = Vec::new();
    for row in week_rows {
        let (Some(row_first), Some(row_last)) = (row.first(), row.last()) else {
            continue;
        };
        let window_start = midnight(*row_first);
        let window_end = midnight(add_days(*row_last, 1));
        if !event.intersects(window_start, window_end) {
            continue;
        }

        let covered: Vec<(usize, NaiveDate)> = row
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, date)| *date >= first_day && *date <= last_day)
            .collect();
        let Some((column, first_covered)) = covered.first().copied() else {
            continue;
        };

        let mut segment = ProcessedEventsData::new(
            event,
            first_covered,
            range_start.max(window_start),
            range_end.min(window_end),
        );
        segment.dates = covered.iter().map(|(_, date)| *date).collect();
        segment.column = column;
        segment.overflow_left = range_start < window_start;
        segment.overflow_right = range_end > window_end;
        segment.is_first_day = !segment.overflow_left;
        segment.is_last_day = !segment.overflow_right;
        segments.push(segment);
    }

    let total_segments = segments.len();
    for (index, segment) in segments.iter_mut().enumerate() {
        segment.segment_index = index;
        segment.total_segments = total_segments;
    }
    mark_render_range(&mut segments);
    segments
}

fn mark_render_range(segments: &mut [ProcessedEventsData<'_>]) {
    let last = segments.len().saturating_sub(1);
    for (index, segment) in segments.iter_mut().enumerate() {
        segment.is_first_segment_in_render_range = index == 0;
        segment.is_last_segment_in_render_range = index == last;
    }
}
