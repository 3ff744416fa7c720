use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::calendar::{midnight, minutes_of_day};
use crate::event::Event;
use crate::overlap::{Availability, check_availability};

/// Where a dragged or resized event is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropSource {
    TimeSlot,
    AllDayRow,
    MonthCell,
}

impl DropSource {
    fn is_day_based(self) -> bool {
        matches!(self, Self::AllDayRow | Self::MonthCell)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeHandle {
    Start,
    End,
}

/// Floors `at` to the slot grid of its day.
pub fn snap_to_interval(at: NaiveDateTime, interval_minutes: u32) -> NaiveDateTime {
    let interval = interval_minutes.max(1);
    let minutes = minutes_of_day(at) / interval * interval;
    midnight(at.date()) + Duration::minutes(i64::from(minutes))
}

fn slot(interval_minutes: u32) -> Duration {
    Duration::minutes(i64::from(interval_minutes.max(1)))
}

/// Candidate event after dropping `event` on the cell at `target`.
/// `grab_offset` is the distance between the event start and the point
/// where it was picked up.
pub fn recalculate_drag(
    event: &Event,
    target: NaiveDateTime,
    source: DropSource,
    grab_offset: Duration,
    interval_minutes: u32,
) -> Event {
    let mut moved = event.clone();

    if source.is_day_based() {
        let target_day = target.date() - Duration::days(grab_offset.num_days());
        let shift = target_day - event.start.date();
        moved.start = event.start + shift;
        moved.end = event.end + shift;
        return moved;
    }

    let start = snap_to_interval(target - grab_offset, interval_minutes);
    let length = if event.is_all_day {
        moved.is_all_day = false;
        slot(interval_minutes)
    } else {
        event.duration()
    };
    moved.start = start;
    moved.end = start + length;
    moved
}

/// Candidate event after moving one edge to the cell at `target`.
/// Time slots keep at least one slot; day-based views resize by whole days.
pub fn recalculate_resize(
    event: &Event,
    handle: ResizeHandle,
    target: NaiveDateTime,
    source: DropSource,
    interval_minutes: u32,
) -> Event {
    let mut resized = event.clone();
    let minimum = slot(interval_minutes);

    if source.is_day_based() {
        let target_day = target.date();
        match handle {
            ResizeHandle::Start => {
                let day = target_day.min(event.last_day());
                resized.start = day.and_time(event.start.time());
                if !event.is_all_day && resized.start + minimum > event.end {
                    resized.start = event.end - minimum;
                }
            }
            ResizeHandle::End => {
                let day = target_day.max(event.start.date());
                resized.end = if event.is_all_day {
                    midnight(day)
                } else {
                    day.and_time(event.end.time()).max(event.start + minimum)
                };
            }
        }
        return resized;
    }

    let cell_start = snap_to_interval(target, interval_minutes);
    match handle {
        ResizeHandle::Start => {
            resized.start = cell_start.min(event.end - minimum);
        }
        ResizeHandle::End => {
            resized.end = (cell_start + minimum).max(event.start + minimum);
        }
    }
    if event.is_all_day {
        resized.is_all_day = false;
    }
    resized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(pub u64);

/// Host hook for animation frames. The gesture owns every handle it
/// requests and cancels outstanding ones when it ends.
pub trait FrameScheduler {
    fn request_frame(&mut self) -> FrameHandle;
    fn cancel_frame(&mut self, handle: FrameHandle);
}

impl<S: FrameScheduler + ?Sized> FrameScheduler for &mut S {
    fn request_frame(&mut self) -> FrameHandle {
        (**self).request_frame()
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        (**self).cancel_frame(handle);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GesturePhase {
    Idle,
    Started,
    Previewing,
    Ending,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureKind {
    Drag { source: DropSource, grab_offset: Duration },
    Resize { handle: ResizeHandle, source: DropSource },
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureOptions {
    /// Pointer travel, in pixels, before the gesture starts.
    pub threshold: f64,
    pub interval_minutes: u32,
    pub allow_overlap: bool,
}

impl Default for GestureOptions {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            interval_minutes: 30,
            allow_overlap: true,
        }
    }
}

/// What a frame callback produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Preview(Event),
    Scroll(f64),
    Ignored,
}

/// Result of ending a gesture. Conflicts leave the event at its
/// pre-gesture snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    Committed(Event),
    Blocked(Availability),
    Overlapping(Availability),
    Cancelled,
}

/// One drag or resize interaction, from pointer-down to drop.
pub struct Gesture<S: FrameScheduler> {
    scheduler: S,
    kind: GestureKind,
    options: GestureOptions,
    snapshot: Event,
    candidate: Option<Event>,
    phase: GesturePhase,
    origin: Point,
    vetoed: bool,
    pending_target: Option<NaiveDateTime>,
    preview_frame: Option<FrameHandle>,
    scroll_frame: Option<FrameHandle>,
    scroll_delta: f64,
}

impl<S: FrameScheduler> fmt::Debug for Gesture<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gesture")
            .field("kind", &self.kind)
            .field("phase", &self.phase)
            .field("guid", &self.snapshot.guid)
            .field("preview_frame", &self.preview_frame)
            .field("scroll_frame", &self.scroll_frame)
            .finish()
    }
}

impl<S: FrameScheduler> Gesture<S> {
    pub fn new(
        scheduler: S,
        event: &Event,
        kind: GestureKind,
        options: GestureOptions,
        origin: Point,
    ) -> Self {
        Self {
            scheduler,
            kind,
            options,
            snapshot: event.clone(),
            candidate: None,
            phase: GesturePhase::Idle,
            origin,
            vetoed: false,
            pending_target: None,
            preview_frame: None,
            scroll_frame: None,
            scroll_delta: 0.0,
        }
    }

    pub fn phase(&self) -> GesturePhase {
        self.phase
    }

    /// The event as it was before the gesture.
    pub fn snapshot(&self) -> &Event {
        &self.snapshot
    }

    /// Latest previewed candidate, if any frame has rendered one.
    pub fn candidate(&self) -> Option<&Event> {
        self.candidate.as_ref()
    }

    /// Feeds a pointer move. `target` is the cell under the pointer, `None`
    /// over an invalid drop target. `on_start` may veto the gesture when
    /// the threshold is first crossed.
    pub fn pointer_moved<F>(
        &mut self,
        position: Point,
        target: Option<NaiveDateTime>,
        on_start: F,
    ) -> GesturePhase
    where
        F: FnOnce(&Event) -> bool,
    {
        if self.vetoed || self.phase == GesturePhase::Ending {
            return self.phase;
        }

        if self.phase == GesturePhase::Idle {
            if position.distance(self.origin) < self.options.threshold {
                return self.phase;
            }
            self.phase = GesturePhase::Started;
            if self.snapshot.is_readonly || !on_start(&self.snapshot) {
                debug!(guid = %self.snapshot.guid, "gesture vetoed");
                self.vetoed = true;
                self.phase = GesturePhase::Idle;
                return self.phase;
            }
        }

        match target {
            Some(target) => {
                self.pending_target = Some(target);
                if self.preview_frame.is_none() {
                    self.preview_frame = Some(self.scheduler.request_frame());
                }
            }
            None if self.phase == GesturePhase::Started => {
                debug!(guid = %self.snapshot.guid, "invalid drop target before first preview");
                self.abandon();
            }
            None => {}
        }
        self.phase
    }

    /// Starts or retargets the repeating auto-scroll loop.
    pub fn start_auto_scroll(&mut self, delta: f64) {
        if !matches!(self.phase, GesturePhase::Started | GesturePhase::Previewing) {
            return;
        }
        self.scroll_delta = delta;
        if self.scroll_frame.is_none() {
            self.scroll_frame = Some(self.scheduler.request_frame());
        }
    }

    pub fn stop_auto_scroll(&mut self) {
        if let Some(handle) = self.scroll_frame.take() {
            self.scheduler.cancel_frame(handle);
        }
    }

    /// Handles a fired animation frame. Previews never touch the
    /// snapshot; scroll frames re-arm themselves.
    pub fn on_frame(&mut self, handle: FrameHandle) -> FrameEvent {
        if self.preview_frame == Some(handle) {
            self.preview_frame = None;
            let Some(target) = self.pending_target.take() else {
                return FrameEvent::Ignored;
            };
            let candidate = self.recalculate(target);
            trace!(start = %candidate.start, end = %candidate.end, "gesture preview");
            self.candidate = Some(candidate.clone());
            self.phase = GesturePhase::Previewing;
            return FrameEvent::Preview(candidate);
        }

        if self.scroll_frame == Some(handle) {
            self.scroll_frame = Some(self.scheduler.request_frame());
            return FrameEvent::Scroll(self.scroll_delta);
        }

        FrameEvent::Ignored
    }

    /// Ends the gesture and validates the final candidate against
    /// `events`.
    #[tracing::instrument(skip(self, events), fields(guid = %self.snapshot.guid))]
    pub fn end(&mut self, events: &[Event]) -> GestureOutcome {
        if !matches!(self.phase, GesturePhase::Started | GesturePhase::Previewing) {
            self.abandon();
            return GestureOutcome::Cancelled;
        }

        self.phase = GesturePhase::Ending;
        if let Some(target) = self.pending_target.take() {
            self.candidate = Some(self.recalculate(target));
        }
        self.cancel_frames();

        let outcome = match self.candidate.take() {
            None => GestureOutcome::Cancelled,
            Some(candidate) => {
                let availability = check_availability(
                    &candidate,
                    events,
                    self.options.allow_overlap,
                );
                if availability.is_blocked() {
                    GestureOutcome::Blocked(availability)
                } else if availability.is_overlapping() {
                    GestureOutcome::Overlapping(availability)
                } else {
                    GestureOutcome::Committed(candidate)
                }
            }
        };

        debug!(outcome = outcome_label(&outcome), "gesture ended");
        self.phase = GesturePhase::Idle;
        outcome
    }

    /// Drops the gesture without mutation.
    pub fn cancel(&mut self) -> GestureOutcome {
        self.abandon();
        GestureOutcome::Cancelled
    }

    fn recalculate(&self, target: NaiveDateTime) -> Event {
        match self.kind {
            GestureKind::Drag { source, grab_offset } => {
                recalculate_drag(
                    &self.snapshot,
                    target,
                    source,
                    grab_offset,
                    self.options.interval_minutes,
                )
            }
            GestureKind::Resize { handle, source } => {
                recalculate_resize(
                    &self.snapshot,
                    handle,
                    target,
                    source,
                    self.options.interval_minutes,
                )
            }
        }
    }

    fn abandon(&mut self) {
        self.cancel_frames();
        self.pending_target = None;
        self.candidate = None;
        self.phase = GesturePhase::Idle;
    }

    fn cancel_frames(&mut self) {
        if let Some(handle) = self.preview_frame.take() {
            self.scheduler.cancel_frame(handle);
        }
        self.stop_auto_scroll();
    }
}

impl<S: FrameScheduler> Drop for Gesture<S> {
    fn drop(&mut self) {
        self.cancel_frames();
    }
}

fn outcome_label(outcome: &GestureOutcome) -> &'static str {
    match outcome {
        GestureOutcome::Committed(_) => "committed",
        GestureOutcome::Blocked(_) => "blocked",
        GestureOutcome::Overlapping(_) => "overlapping",
        GestureOutcome::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingScheduler {
        next: u64,
        requested: usize,
        active: BTreeSet<FrameHandle>,
    }

    impl FrameScheduler for RecordingScheduler {
        fn request_frame(&mut self) -> FrameHandle {
            self.next += 1;
            self.requested += 1;
            let handle = FrameHandle(self.next);
            self.active.insert(handle);
            handle
        }

        fn cancel_frame(&mut self, handle: FrameHandle) {
            self.active.remove(&handle);
        }
    }

    impl RecordingScheduler {
        fn fire_latest(&mut self) -> FrameHandle {
            let handle = self.active.iter().next_back().copied().expect("pending frame");
            self.active.remove(&handle);
            handle
        }
    }

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, d)
            .and_then(|date| date.and_hms_opt(h, m, 0))
            .expect("valid datetime")
    }

    fn drag() -> GestureKind {
        GestureKind::Drag {
            source: DropSource::TimeSlot,
            grab_offset: Duration::zero(),
        }
    }

    #[test]
    fn drop_on_next_day_time_slot_preserves_duration() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let moved = recalculate_drag(
            &event,
            at(17, 14, 0),
            DropSource::TimeSlot,
            Duration::zero(),
            30,
        );
        assert_eq!(moved.start, at(17, 14, 0));
        assert_eq!(moved.end, at(17, 15, 0));
        assert_eq!(event.start, at(16, 9, 0));
    }

    #[test]
    fn drop_snaps_down_after_grab_offset() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let moved = recalculate_drag(
            &event,
            at(16, 14, 50),
            DropSource::TimeSlot,
            Duration::minutes(20),
            15,
        );
        assert_eq!(moved.start, at(16, 14, 30));
        assert_eq!(moved.end, at(16, 15, 30));
    }

    #[test]
    fn all_day_dropped_on_slot_becomes_timed() {
        let event = Event::all_day(
            "holiday",
            NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
            NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date"),
        );
        let moved = recalculate_drag(
            &event,
            at(18, 11, 0),
            DropSource::TimeSlot,
            Duration::zero(),
            30,
        );
        assert!(!moved.is_all_day);
        assert_eq!(moved.start, at(18, 11, 0));
        assert_eq!(moved.end, at(18, 11, 30));
    }

    #[test]
    fn month_drop_keeps_time_of_day_and_span() {
        let timed = Event::new("standup", at(16, 9, 15), at(16, 9, 45));
        let moved = recalculate_drag(
            &timed,
            at(19, 0, 0),
            DropSource::MonthCell,
            Duration::zero(),
            30,
        );
        assert_eq!(moved.start, at(19, 9, 15));
        assert_eq!(moved.end, at(19, 9, 45));

        let trip = Event::all_day(
            "trip",
            NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
            NaiveDate::from_ymd_opt(2026, 2, 18).expect("valid date"),
        );
        // Grabbed by its second day.
        let moved = recalculate_drag(
            &trip,
            at(24, 0, 0),
            DropSource::AllDayRow,
            Duration::days(1),
            30,
        );
        assert!(moved.is_all_day);
        assert_eq!(moved.start, at(23, 0, 0));
        assert_eq!(moved.end, at(25, 0, 0));
    }

    #[test]
    fn resize_keeps_one_slot_minimum() {
        let event = Event::new("focus", at(16, 9, 0), at(16, 11, 0));
        let longer = recalculate_resize(
            &event,
            ResizeHandle::End,
            at(16, 12, 10),
            DropSource::TimeSlot,
            30,
        );
        assert_eq!(longer.end, at(16, 12, 30));

        let collapsed = recalculate_resize(
            &event,
            ResizeHandle::End,
            at(16, 8, 0),
            DropSource::TimeSlot,
            30,
        );
        assert_eq!(collapsed.end, at(16, 9, 30));

        let earlier = recalculate_resize(
            &event,
            ResizeHandle::Start,
            at(16, 7, 40),
            DropSource::TimeSlot,
            30,
        );
        assert_eq!(earlier.start, at(16, 7, 30));

        let past_end = recalculate_resize(
            &event,
            ResizeHandle::Start,
            at(16, 13, 0),
            DropSource::TimeSlot,
            30,
        );
        assert_eq!(past_end.start, at(16, 10, 30));
    }

    #[test]
    fn month_resize_moves_whole_days() {
        let event = Event::new("workshop", at(16, 9, 0), at(16, 17, 0));
        let resized = recalculate_resize(
            &event,
            ResizeHandle::End,
            at(18, 0, 0),
            DropSource::MonthCell,
            30,
        );
        assert_eq!(resized.start, at(16, 9, 0));
        assert_eq!(resized.end, at(18, 17, 0));
    }

    #[test]
    fn threshold_gates_start_and_previews_are_throttled() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let mut scheduler = RecordingScheduler::default();
        {
            let mut gesture = Gesture::new(
                &mut scheduler,
                &event,
                drag(),
                GestureOptions::default(),
                Point::default(),
            );

            assert_eq!(
                gesture.pointer_moved(Point::new(2.0, 2.0), Some(at(16, 9, 0)), |_| true),
                GesturePhase::Idle,
            );
            assert_eq!(
                gesture.pointer_moved(Point::new(0.0, 40.0), Some(at(16, 13, 0)), |_| true),
                GesturePhase::Started,
            );
            gesture.pointer_moved(Point::new(0.0, 60.0), Some(at(16, 13, 30)), |_| true);
            gesture.pointer_moved(Point::new(0.0, 80.0), Some(at(16, 14, 0)), |_| true);
        }
        assert_eq!(scheduler.requested, 1);
        assert!(scheduler.active.is_empty(), "drop cancels outstanding frames");
    }

    #[test]
    fn preview_then_commit() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let mut scheduler = RecordingScheduler::default();
        let mut gesture = Gesture::new(
            &mut scheduler,
            &event,
            drag(),
            GestureOptions::default(),
            Point::default(),
        );

        gesture.pointer_moved(Point::new(0.0, 50.0), Some(at(16, 14, 0)), |_| true);
        let frame = gesture.scheduler.fire_latest();
        match gesture.on_frame(frame) {
            FrameEvent::Preview(preview) => assert_eq!(preview.start, at(16, 14, 0)),
            other => panic!("expected preview, got {other:?}"),
        }
        assert_eq!(gesture.phase(), GesturePhase::Previewing);
        assert_eq!(gesture.snapshot().start, at(16, 9, 0));

        match gesture.end(&[event.clone()]) {
            GestureOutcome::Committed(moved) => {
                assert_eq!(moved.guid, event.guid);
                assert_eq!(moved.start, at(16, 14, 0));
                assert_eq!(moved.end, at(16, 15, 0));
            }
            other => panic!("expected commit, got {other:?}"),
        }
        assert_eq!(gesture.phase(), GesturePhase::Idle);
    }

    #[test]
    fn veto_returns_to_idle_without_frames() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let mut scheduler = RecordingScheduler::default();
        let mut gesture = Gesture::new(
            &mut scheduler,
            &event,
            drag(),
            GestureOptions::default(),
            Point::default(),
        );

        assert_eq!(
            gesture.pointer_moved(Point::new(30.0, 0.0), Some(at(16, 12, 0)), |_| false),
            GesturePhase::Idle,
        );
        assert_eq!(
            gesture.pointer_moved(Point::new(60.0, 0.0), Some(at(16, 13, 0)), |_| true),
            GesturePhase::Idle,
        );
        assert_eq!(gesture.end(&[]), GestureOutcome::Cancelled);
        drop(gesture);
        assert_eq!(scheduler.requested, 0);
    }

    #[test]
    fn readonly_event_never_starts() {
        let mut event = Event::new("locked", at(16, 9, 0), at(16, 10, 0));
        event.is_readonly = true;
        let mut scheduler = RecordingScheduler::default();
        let mut gesture = Gesture::new(
            &mut scheduler,
            &event,
            drag(),
            GestureOptions::default(),
            Point::default(),
        );
        assert_eq!(
            gesture.pointer_moved(Point::new(30.0, 0.0), Some(at(16, 12, 0)), |_| true),
            GesturePhase::Idle,
        );
    }

    #[test]
    fn invalid_target_before_preview_goes_idle() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let mut scheduler = RecordingScheduler::default();
        let mut gesture = Gesture::new(
            &mut scheduler,
            &event,
            drag(),
            GestureOptions::default(),
            Point::default(),
        );
        assert_eq!(
            gesture.pointer_moved(Point::new(30.0, 0.0), None, |_| true),
            GesturePhase::Idle,
        );
        assert!(gesture.candidate().is_none());
    }

    #[test]
    fn blocked_drop_reverts() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let lunch = Event::new("lunch", at(16, 12, 0), at(16, 13, 0)).blocking();
        let mut scheduler = RecordingScheduler::default();
        let mut gesture = Gesture::new(
            &mut scheduler,
            &event,
            drag(),
            GestureOptions::default(),
            Point::default(),
        );

        gesture.pointer_moved(Point::new(0.0, 50.0), Some(at(16, 12, 30)), |_| true);
        let outcome = gesture.end(&[event.clone(), lunch.clone()]);
        match outcome {
            GestureOutcome::Blocked(availability) => {
                assert_eq!(availability.blocked, vec![lunch.guid])
            }
            other => panic!("expected blocked, got {other:?}"),
        }
        assert_eq!(gesture.snapshot(), &event);
    }

    #[test]
    fn overlap_rejected_when_disallowed() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let sync = Event::new("sync", at(16, 14, 0), at(16, 15, 0));
        let options = GestureOptions {
            allow_overlap: false,
            ..GestureOptions::default()
        };
        let mut scheduler = RecordingScheduler::default();
        let mut gesture = Gesture::new(&mut scheduler, &event, drag(), options, Point::default());

        gesture.pointer_moved(Point::new(0.0, 50.0), Some(at(16, 14, 30)), |_| true);
        assert!(matches!(gesture.end(&[event.clone(), sync]), GestureOutcome::Overlapping(_)));
    }

    #[test]
    fn auto_scroll_repeats_until_cancelled() {
        let event = Event::new("review", at(16, 9, 0), at(16, 10, 0));
        let mut scheduler = RecordingScheduler::default();
        let mut gesture = Gesture::new(
            &mut scheduler,
            &event,
            drag(),
            GestureOptions::default(),
            Point::default(),
        );

        gesture.pointer_moved(Point::new(0.0, 50.0), Some(at(16, 11, 0)), |_| true);
        gesture.start_auto_scroll(12.0);
        let scroll = gesture.scroll_frame.expect("scroll frame");
        gesture.scheduler.active.remove(&scroll);
        assert_eq!(gesture.on_frame(scroll), FrameEvent::Scroll(12.0));
        assert_eq!(gesture.scheduler.requested, 3);
        assert_ne!(gesture.scroll_frame, Some(scroll));

        assert_eq!(gesture.cancel(), GestureOutcome::Cancelled);
        assert_eq!(gesture.phase(), GesturePhase::Idle);
        drop(gesture);
        assert!(scheduler.active.is_empty());
    }
}
