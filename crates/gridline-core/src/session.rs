use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::{ViewType, add_days, midnight, render_dates, week_rows};
use crate::config::SchedulerConfig;
use crate::event::Event;
use crate::geometry::{apply_time_slot_geometry, row_geometry};
use crate::gesture::{FrameScheduler, Gesture, GestureKind, GestureOptions, GestureOutcome, Point};
use crate::navigation::{NavigationDirection, NavigationOptions, navigate, navigate_to_today};
use crate::overlap::{
    Availability, assign_row_positions, calculate_overlapping_events, check_availability,
};
use crate::segment::{ProcessedEventsData, split_event_by_day, split_event_by_week};

/// Where multi-day timed events go in views with a time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpannedPlacement {
    #[default]
    AllDayRow,
    TimeSlot,
}

/// Host data source that receives committed mutations.
pub trait EventSource {
    /// Stores a new event and returns it as stored.
    fn add_event(&mut self, event: Event) -> anyhow::Result<Event>;
    fn save_event(&mut self, event: Event) -> anyhow::Result<()>;
    fn delete_event(&mut self, guid: Uuid) -> anyhow::Result<Option<Event>>;
}

impl EventSource for Vec<Event> {
    fn add_event(&mut self, event: Event) -> anyhow::Result<Event> {
        self.push(event.clone());
        Ok(event)
    }

    fn save_event(&mut self, event: Event) -> anyhow::Result<()> {
        let slot = self
            .iter_mut()
            .find(|existing| existing.guid == event.guid)
            .ok_or_else(|| anyhow!("event not found: {}", event.guid))?;
        *slot = event;
        Ok(())
    }

    fn delete_event(&mut self, guid: Uuid) -> anyhow::Result<Option<Event>> {
        Ok(self
            .iter()
            .position(|event| event.guid == guid)
            .map(|index| self.remove(index)))
    }
}

/// Result of a validated mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Applied(Event),
    Rejected(Availability),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayColumn<'a> {
    pub date: NaiveDate,
    pub segments: Vec<ProcessedEventsData<'a>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthRow<'a> {
    pub dates: Vec<NaiveDate>,
    pub segments: Vec<ProcessedEventsData<'a>>,
}

/// Full placement output of one render pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout<'a> {
    pub view: ViewType,
    pub dates: Vec<NaiveDate>,
    pub days: Vec<DayColumn<'a>>,
    pub all_day_row: Vec<ProcessedEventsData<'a>>,
    pub month_rows: Vec<MonthRow<'a>>,
}

impl Layout<'_> {
    pub fn segment_count(&self) -> usize {
        self.days.iter().map(|day| day.segments.len()).sum::<usize>()
            + self.all_day_row.len()
            + self.month_rows.iter().map(|row| row.segments.len()).sum::<usize>()
    }
}

#[derive(Debug, Default)]
pub struct SessionBuilder {
    config: SchedulerConfig,
    selected_date: Option<NaiveDate>,
    display_date: Option<NaiveDate>,
    view: Option<ViewType>,
    events: Vec<Event>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn selected_date(mut self, date: NaiveDate) -> Self {
        self.selected_date = Some(date);
        self
    }

    /// Anchors a fixed-length month grid on another date.
    pub fn display_date(mut self, date: Option<NaiveDate>) -> Self {
        self.display_date = date;
        self
    }

    pub fn view(mut self, view: ViewType) -> Self {
        self.view = Some(view);
        self
    }

    pub fn events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> anyhow::Result<SchedulerSession> {
        let selected_date = self
            .selected_date
            .context("scheduler session requires a selected date")?;
        let view = self.view.unwrap_or(self.config.view.current);
        debug!(
            %selected_date,
            view = view.as_key(),
            events = self.events.len(),
            "built scheduler session",
        );
        Ok(SchedulerSession {
            config: self.config,
            selected_date,
            display_date: self.display_date,
            view,
            events: self.events,
        })
    }
}

/// Explicit scheduler context: configuration, selected date, view and
/// events.
#[derive(Debug, Clone)]
pub struct SchedulerSession {
    config: SchedulerConfig,
    selected_date: NaiveDate,
    display_date: Option<NaiveDate>,
    view: ViewType,
    events: Vec<Event>,
}

impl SchedulerSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn selected_date(&self) -> NaiveDate {
        self.selected_date
    }

    pub fn set_selected_date(&mut self, date: NaiveDate) {
        self.selected_date = date;
        self.display_date = None;
    }

    pub fn display_date(&self) -> Option<NaiveDate> {
        self.display_date
    }

    pub fn view(&self) -> ViewType {
        self.view
    }

    pub fn set_view(&mut self, view: ViewType) {
        self.view = view;
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn find_event(&self, guid: Uuid) -> Option<&Event> {
        self.events.iter().find(|event| event.guid == guid)
    }

    pub fn render_dates(&self) -> Vec<NaiveDate> {
        render_dates(self.view, self.selected_date, &self.config.render_options(self.display_date))
    }

    /// Events touching `[from, to)`, ordered by start.
    pub fn visible_events(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<&Event> {
        let mut visible: Vec<&Event> = self
            .events
            .iter()
            .filter(|event| event.intersects(from, to))
            .collect();
        visible.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.guid.cmp(&b.guid)));
        visible
    }

    /// Runs the full pipeline for the current view and date.
    #[tracing::instrument(
        skip(self),
        fields(view = self.view.as_key(), selected = %self.selected_date),
    )]
    pub fn layout(&self) -> Layout<'_> {
        let dates = self.render_dates();
        let mut layout = Layout {
            view: self.view,
            days: Vec::new(),
            all_day_row: Vec::new(),
            month_rows: Vec::new(),
            dates,
        };
        let window = layout
            .dates
            .first()
            .zip(layout.dates.last())
            .map(|(first, last)| (midnight(*first), midnight(add_days(*last, 1))));
        let Some((from, to)) = window else {
            return layout;
        };
        let visible = self.visible_events(from, to);

        if self.view.has_time_axis() {
            self.layout_time_axis(&mut layout, &visible);
        } else {
            self.layout_month(&mut layout, &visible);
        }
        debug!(visible = visible.len(), segments = layout.segment_count(), "laid out events");
        layout
    }

    fn layout_time_axis<'a>(&self, layout: &mut Layout<'a>, visible: &[&'a Event]) {
        let placement = self.config.view.spanned_event_placement;
        let rtl = self.config.view.rtl;
        let row_height = self.config.layout.row_height;
        let gap = self.config.layout.row_gap;
        let single_row = vec![layout.dates.clone()];

        let mut by_day: BTreeMap<NaiveDate, Vec<ProcessedEventsData<'a>>> = BTreeMap::new();
        let mut spanning = Vec::new();
        for event in visible.iter().copied() {
            let to_all_day_row =
                event.is_all_day
                    || (placement == SpannedPlacement::AllDayRow && event.spans_multiple_days());
            if to_all_day_row {
                spanning.extend(split_event_by_week(&single_row, event));
            } else {
                for segment in split_event_by_day(event, &layout.dates) {
                    by_day.entry(segment.date()).or_default().push(segment);
                }
            }
        }

        let columns = layout.dates.len();
        layout.all_day_row = assign_row_positions(spanning)
            .into_iter()
            .map(|mut segment| {
                segment.geometry = Some(row_geometry(&segment, columns, row_height, gap, rtl));
                segment
            })
            .collect();

        let time_scale = self.config.time_scale();
        let visible_hours = self.config.visible_hours();
        layout.days = layout
            .dates
            .iter()
            .map(|date| {
                let segments = by_day.remove(date).unwrap_or_default();
                let mut placed: Vec<ProcessedEventsData<'a>> =
                    calculate_overlapping_events(segments, self.config.view.allow_overlap)
                        .into_iter()
                        .flatten()
                        .collect();
                apply_time_slot_geometry(
                    &mut placed,
                    &time_scale,
                    visible_hours,
                    rtl,
                    row_height,
                    gap,
                );
                DayColumn {
                    date: *date,
                    segments: placed,
                }
            })
            .collect();
    }

    fn layout_month<'a>(&self, layout: &mut Layout<'a>, visible: &[&'a Event]) {
        let rows = week_rows(&layout.dates, self.config.view.first_day_of_week);
        let segments: Vec<ProcessedEventsData<'a>> = visible
            .iter()
            .flat_map(|event| split_event_by_week(&rows, event))
            .collect();

        let mut month_rows: Vec<MonthRow<'a>> = rows
            .into_iter()
            .map(|dates| MonthRow {
                dates,
                segments: Vec::new(),
            })
            .collect();

        for mut segment in assign_row_positions(segments) {
            let date = segment.date();
            let Some(row) = month_rows.iter_mut().find(|row| row.dates.contains(&date)) else {
                continue;
            };
            segment.geometry = Some(row_geometry(
                &segment,
                row.dates.len(),
                self.config.layout.row_height,
                self.config.layout.row_gap,
                self.config.view.rtl,
            ));
            row.segments.push(segment);
        }
        layout.month_rows = month_rows;
    }

    fn navigation_options(&self) -> NavigationOptions {
        NavigationOptions::new(self.view, &self.config.render_options(None))
    }

    pub fn navigate(&mut self, direction: NavigationDirection) -> NaiveDate {
        let next = navigate(self.selected_date, direction, &self.navigation_options());
        self.set_selected_date(next);
        self.selected_date
    }

    pub fn today(&mut self, now: DateTime<Utc>) -> NaiveDate {
        self.set_selected_date(navigate_to_today(self.config.timezone(), now));
        self.selected_date
    }

    pub fn check_availability(&self, candidate: &Event) -> Availability {
        check_availability(candidate, &self.events, self.config.view.allow_overlap)
    }

    pub fn begin_gesture<S: FrameScheduler>(
        &self,
        scheduler: S,
        guid: Uuid,
        kind: GestureKind,
        origin: Point,
    ) -> anyhow::Result<Gesture<S>> {
        let event = self
            .find_event(guid)
            .ok_or_else(|| anyhow!("event not found: {guid}"))?;
        let options = GestureOptions {
            threshold: self.config.layout.drag_threshold,
            interval_minutes: self.config.slot_minutes(),
            allow_overlap: self.config.view.allow_overlap,
        };
        Ok(Gesture::new(scheduler, event, kind, options, origin))
    }

    /// Applies a finished gesture. Conflicts and cancellations leave the
    /// session untouched.
    pub fn commit<E: EventSource>(
        &mut self,
        source: &mut E,
        outcome: GestureOutcome,
    ) -> anyhow::Result<Option<Mutation>> {
        match outcome {
            GestureOutcome::Committed(event) => {
                source.save_event(event.clone())?;
                self.replace(event.clone());
                info!(
                    guid = %event.guid,
                    start = %event.start,
                    end = %event.end,
                    "committed gesture",
                );
                Ok(Some(Mutation::Applied(event)))
            }
            GestureOutcome::Blocked(availability) | GestureOutcome::Overlapping(availability) => {
                info!(
                    blocked = availability.blocked.len(),
                    overlapping = availability.overlapping.len(),
                    "gesture reverted"
                );
                Ok(Some(Mutation::Rejected(availability)))
            }
            GestureOutcome::Cancelled => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, source, event), fields(guid = %event.guid))]
    pub fn add_event<E: EventSource>(
        &mut self,
        source: &mut E,
        event: Event,
    ) -> anyhow::Result<Mutation> {
        let availability = self.check_availability(&event);
        if !availability.is_clear() {
            return Ok(Mutation::Rejected(availability));
        }
        let stored = source.add_event(event)?;
        self.events.push(stored.clone());
        Ok(Mutation::Applied(stored))
    }

    #[tracing::instrument(skip(self, source, event), fields(guid = %event.guid))]
    pub fn save_event<E: EventSource>(
        &mut self,
        source: &mut E,
        event: Event,
    ) -> anyhow::Result<Mutation> {
        if self.find_event(event.guid).is_none() {
            return Err(anyhow!("event not found: {}", event.guid));
        }
        let availability = self.check_availability(&event);
        if !availability.is_clear() {
            return Ok(Mutation::Rejected(availability));
        }
        source.save_event(event.clone())?;
        self.replace(event.clone());
        Ok(Mutation::Applied(event))
    }

    #[tracing::instrument(skip(self, source))]
    pub fn delete_event<E: EventSource>(
        &mut self,
        source: &mut E,
        guid: Uuid,
    ) -> anyhow::Result<Option<Event>> {
        let removed = source.delete_event(guid)?;
        self.events.retain(|event| event.guid != guid);
        Ok(removed)
    }

    fn replace(&mut self, event: Event) {
        match self.events.iter_mut().find(|existing| existing.guid == event.guid) {
            Some(slot) => *slot = event,
            None => self.events.push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::gesture::DropSource;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).expect("valid date")
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        date(d).and_hms_opt(h, m, 0).expect("valid time")
    }

    fn session(events: Vec<Event>, view: ViewType) -> SchedulerSession {
        SchedulerSession::builder()
            .selected_date(date(18))
            .view(view)
            .events(events)
            .build()
            .expect("session builds")
    }

    #[test]
    fn builder_requires_selected_date() {
        let err = SchedulerSession::builder().build().expect_err("missing date");
        assert!(err.to_string().contains("selected date"));
    }

    #[test]
    fn display_date_anchors_fixed_month_grid_until_navigation() {
        let mut config = SchedulerConfig::default();
        config.view.number_of_weeks = Some(2);
        let display = NaiveDate::from_ymd_opt(2026, 3, 4).expect("valid date");
        let mut session = SchedulerSession::builder()
            .config(config)
            .selected_date(date(18))
            .display_date(Some(display))
            .view(ViewType::Month)
            .build()
            .expect("session builds");

        let dates = session.render_dates();
        assert_eq!(dates.len(), 14);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date"));

        session.navigate(NavigationDirection::Next);
        assert_eq!(session.display_date(), None);
        let dates = session.render_dates();
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2026, 3, 15).expect("valid date"));
    }

    #[test]
    fn overlapping_events_split_the_column() {
        let events = vec![
            Event::new("standup", at(16, 9, 0), at(16, 10, 0)),
            Event::new("review", at(16, 9, 30), at(16, 10, 30)),
        ];
        let session = session(events, ViewType::Week);
        let layout = session.layout();

        assert_eq!(layout.dates.len(), 7);
        let monday = layout
            .days
            .iter()
            .find(|day| day.date == date(16))
            .expect("monday column");
        assert_eq!(monday.segments.len(), 2);
        let widths: Vec<f64> = monday
            .segments
            .iter()
            .filter_map(|segment| segment.geometry.map(|geometry| geometry.width))
            .collect();
        assert_eq!(widths, vec![50.0, 50.0]);
        let positions: Vec<usize> = monday.segments.iter().map(|s| s.position_index).collect();
        assert_eq!(positions, vec![0, 1]);
    }

    #[test]
    fn spanned_placement_routes_multi_day_timed_events() {
        let overnight = Event::new("overnight", at(16, 22, 0), at(17, 6, 0));
        let row_session = session(vec![overnight.clone()], ViewType::Week);
        let layout = row_session.layout();
        assert_eq!(layout.all_day_row.len(), 1);
        assert_eq!(layout.all_day_row[0].span(), 2);
        assert!(layout.days.iter().all(|day| day.segments.is_empty()));

        let mut config = SchedulerConfig::default();
        config.view.spanned_event_placement = SpannedPlacement::TimeSlot;
        let slot_session = SchedulerSession::builder()
            .config(config)
            .selected_date(date(18))
            .view(ViewType::Week)
            .events(vec![overnight])
            .build()
            .expect("session builds");
        let layout = slot_session.layout();
        assert!(layout.all_day_row.is_empty());
        assert_eq!(layout.segment_count(), 2);
    }

    #[test]
    fn month_layout_fills_week_rows() {
        let trip = Event::all_day("trip", date(20), date(23));
        let session = session(vec![trip], ViewType::Month);
        let layout = session.layout();

        // February 2026 starts on Sunday and ends on Saturday.
        assert_eq!(layout.month_rows.len(), 4);
        let touched: Vec<usize> = layout.month_rows.iter().map(|row| row.segments.len()).collect();
        assert_eq!(touched, vec![0, 0, 1, 1]);
        assert!(layout.month_rows[2].segments[0].overflow_right);
        assert!(layout.month_rows[3].segments[0].overflow_left);
    }

    #[test]
    fn layout_is_stable_across_passes() {
        let events = vec![
            Event::new("a", at(17, 9, 0), at(17, 11, 0)),
            Event::new("b", at(17, 10, 0), at(17, 12, 0)),
            Event::all_day("c", date(16), date(18)),
        ];
        let session = session(events, ViewType::Week);
        assert_eq!(session.layout(), session.layout());
    }

    #[test]
    fn navigation_updates_selected_date() {
        let mut session = session(Vec::new(), ViewType::Week);
        assert_eq!(session.navigate(NavigationDirection::Next), date(25));
        assert_eq!(session.navigate(NavigationDirection::Previous), date(18));

        let now = Utc
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid instant");
        assert_eq!(
            session.today(now),
            NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date")
        );
    }

    #[test]
    fn add_event_rejects_blocked_range() {
        let lunch = Event::new("lunch", at(16, 12, 0), at(16, 13, 0)).blocking();
        let mut source = vec![lunch.clone()];
        let mut session = session(vec![lunch.clone()], ViewType::Week);

        let rejected = session
            .add_event(&mut source, Event::new("focus", at(16, 12, 30), at(16, 14, 0)))
            .expect("add runs");
        assert!(matches!(
            rejected,
            Mutation::Rejected(ref availability) if availability.blocked == vec![lunch.guid]
        ));
        assert_eq!(source.len(), 1);

        let applied = session
            .add_event(&mut source, Event::new("focus", at(16, 14, 0), at(16, 15, 0)))
            .expect("add runs");
        assert!(matches!(applied, Mutation::Applied(_)));
        assert_eq!(source.len(), 2);
        assert_eq!(session.events().len(), 2);
    }

    #[test]
    fn committed_gesture_reaches_source() {
        let review = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let mut source = vec![review.clone()];
        let mut session = session(vec![review.clone()], ViewType::Week);

        #[derive(Default)]
        struct Frames(u64);
        impl FrameScheduler for Frames {
            fn request_frame(&mut self) -> crate::gesture::FrameHandle {
                self.0 += 1;
                crate::gesture::FrameHandle(self.0)
            }
            fn cancel_frame(&mut self, _handle: crate::gesture::FrameHandle) {}
        }

        let kind = GestureKind::Drag {
            source: DropSource::TimeSlot,
            grab_offset: Duration::zero(),
        };
        let mut gesture = session
            .begin_gesture(Frames::default(), review.guid, kind, Point::default())
            .expect("gesture starts");
        gesture.pointer_moved(Point::new(0.0, 80.0), Some(at(16, 14, 0)), |_| true);
        let outcome = gesture.end(session.events());
        drop(gesture);

        let mutation = session.commit(&mut source, outcome).expect("commit runs");
        assert!(matches!(mutation, Some(Mutation::Applied(_))));
        assert_eq!(source[0].start, at(16, 14, 0));
        assert_eq!(session.find_event(review.guid).map(|event| event.end), Some(at(16, 15, 0)));
    }

    #[test]
    fn delete_removes_from_session_and_source() {
        let review = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let mut source = vec![review.clone()];
        let mut session = session(vec![review.clone()], ViewType::Week);
        let removed = session.delete_event(&mut source, review.guid).expect("delete runs");
        assert_eq!(removed.map(|event| event.guid), Some(review.guid));
        assert!(source.is_empty());
        assert!(session.events().is_empty());
    }
}
