use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::calendar::{MINUTES_PER_DAY, midnight};
use crate::segment::ProcessedEventsData;

/// Slot layout of the time axis: `interval` minutes per major slot, split
/// into `slot_count` minor slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeScale {
    pub enable: bool,
    pub interval: u32,
    pub slot_count: u32,
}

impl Default for TimeScale {
    fn default() -> Self {
        Self {
            enable: true,
            interval: 60,
            slot_count: 2,
        }
    }
}

impl TimeScale {
    /// Minutes covered by one minor slot.
    pub fn slot_minutes(&self) -> u32 {
        (self.interval / self.slot_count.max(1)).max(1)
    }

}

/// Visible window of each day column, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisibleHours {
    pub start: u32,
    pub end: u32,
}

impl Default for VisibleHours {
    fn default() -> Self {
        Self {
            start: 0,
            end: MINUTES_PER_DAY,
        }
    }
}

impl VisibleHours {
    /// Falls back to the whole day when the bounds are empty or inverted.
    pub fn new(start: u32, end: u32) -> Self {
        let end = end.min(MINUTES_PER_DAY);
        if start >= end {
            return Self::default();
        }
        Self { start, end }
    }

    pub fn minutes(&self) -> u32 {
        self.end - self.start
    }

    pub fn window(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let base = midnight(date);
        (
            base + Duration::minutes(i64::from(self.start)),
            base + Duration::minutes(i64::from(self.end)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Percent,
    Pixels,
}

impl Unit {
    fn suffix(self) -> &'static str {
        match self {
            Self::Percent => "%",
            Self::Pixels => "px",
        }
    }
}

/// Edge the inline offset is measured from; right-to-left layouts mirror it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InlineEdge {
    Left,
    Right,
}

impl InlineEdge {
    pub fn for_direction(rtl: bool) -> Self {
        if rtl { Self::Right } else { Self::Left }
    }

    fn property(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EventGeometry {
    pub top: f64,
    pub height: f64,
    pub vertical_unit: Unit,
    pub inline_offset: f64,
    pub width: f64,
    pub edge: InlineEdge,
}

impl EventGeometry {
    /// CSS-style declaration list, e.g. `top: 10%; height: 5%; left: 0%; width: 50%`.
    pub fn to_css(&self) -> String {
        let vertical = self.vertical_unit.suffix();
        format!(
            "top: {}{vertical}; height: {}{vertical}; {}: {}%; width: {}%",
            trim_number(self.top),
            trim_number(self.height),
            self.edge.property(),
            trim_number(self.inline_offset),
            trim_number(self.width),
        )
    }
}

impl fmt::Display for EventGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

fn trim_number(value: f64) -> String {
    let text = format!("{value:.3}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Percentage of the visible window at which `at` falls, clamped to [0, 100].
pub fn percent_of_window(at: NaiveDateTime, window: (NaiveDateTime, NaiveDateTime)) -> f64 {
    let (window_start, window_end) = window;
    let total = (window_end - window_start).num_seconds();
    if total <= 0 {
        return 0.0;
    }
    let offset = (at - window_start).num_seconds();
    (offset as f64 * 100.0 / total as f64).clamp(0.0, 100.0)
}

/// Top and height, in percent of the visible window, of `[start, end)` on `date`.
pub fn vertical_geometry(
    start: NaiveDateTime,
    end: NaiveDateTime,
    date: NaiveDate,
    visible: VisibleHours,
) -> (f64, f64) {
    let window = visible.window(date);
    let top = percent_of_window(start, window);
    let bottom = percent_of_window(end.max(start), window);
    (top, (bottom - top).max(0.0))
}

/// Inline offset and width, in percent, of lane `position` out of `total`.
pub fn horizontal_geometry(position: usize, total: usize) -> (f64, f64) {
    let total = total.max(1);
    let width = 100.0 / total as f64;
    (position.min(total - 1) as f64 * width, width)
}

/// Proportional geometry of a time-slot segment.
pub fn time_slot_geometry(
    segment: &ProcessedEventsData<'_>,
    visible: VisibleHours,
    rtl: bool,
) -> EventGeometry {
    let (top, height) = vertical_geometry(segment.start, segment.end, segment.date(), visible);
    let (inline_offset, width) = horizontal_geometry(
        segment.position_index,
        segment.total_overlapping,
    );
    EventGeometry {
        top,
        height,
        vertical_unit: Unit::Percent,
        inline_offset,
        width,
        edge: InlineEdge::for_direction(rtl),
    }
}

/// Fixed-height row geometry used by the all-day row, month cells and
/// views without a time axis.
pub fn row_geometry(
    segment: &ProcessedEventsData<'_>,
    columns: usize,
    row_height: f64,
    gap: f64,
    rtl: bool,
) -> EventGeometry {
    let columns = columns.max(1);
    let column_width = 100.0 / columns as f64;
    EventGeometry {
        top: segment.position_index as f64 * (row_height + gap),
        height: row_height,
        vertical_unit: Unit::Pixels,
        inline_offset: segment.column as f64 * column_width,
        width: segment.span().min(columns - segment.column.min(columns - 1)) as f64 * column_width,
        edge: InlineEdge::for_direction(rtl),
    }
}

/// Fills in geometry for every segment of a day column.
pub fn apply_time_slot_geometry(
    segments: &mut [ProcessedEventsData<'_>],
    time_scale: &TimeScale,
    visible: VisibleHours,
    rtl: bool,
    row_height: f64,
    gap: f64,
) {
    for segment in segments.iter_mut() {
        let geometry = if time_scale.enable {
            time_slot_geometry(segment, visible, rtl)
        } else {
            // One column per day column; the segment occupies all of it.
            let mut single = row_geometry(segment, 1, row_height, gap, rtl);
            single.inline_offset = 0.0;
            single.width = 100.0;
            single
        };
        segment.geometry = Some(geometry);
    }
}
