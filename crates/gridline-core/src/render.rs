use std::io::{self, IsTerminal, Write};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use unicode_width::UnicodeWidthStr;
use uuid::Uuid;

use crate::calendar::{is_midnight, week_number};
use crate::event::Event;
use crate::overlap::Availability;
use crate::segment::ProcessedEventsData;
use crate::session::{Layout, Mutation};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    #[tracing::instrument(skip(self, dates))]
    pub fn print_dates(&mut self, dates: &[NaiveDate], selected: NaiveDate) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let (headers, rows) = self.dates_table(dates, selected);
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, layout), fields(view = layout.view.as_key()))]
    pub fn print_layout(&mut self, layout: &Layout<'_>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if let (Some(first), Some(last)) = (layout.dates.first(), layout.dates.last()) {
            writeln!(out, "{} {} .. {}", layout.view.as_key(), first, last)?;
        }
        if layout.segment_count() == 0 {
            writeln!(out, "No events.")?;
            return Ok(());
        }
        let (headers, rows) = self.layout_table(layout);
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, availability, events))]
    pub fn print_availability(
        &mut self,
        availability: &Availability,
        events: &[Event],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if availability.is_clear() {
            writeln!(out, "{}", self.paint("Available.", "32"))?;
            return Ok(());
        }

        let headers = vec![
            "Conflict".to_string(),
            "ID".to_string(),
            "Start".to_string(),
            "End".to_string(),
            "Subject".to_string(),
        ];
        let mut rows = Vec::new();
        let tagged = availability
            .blocked
            .iter()
            .map(|guid| ("blocked", guid))
            .chain(availability.overlapping.iter().map(|guid| ("overlap", guid)));
        for (kind, guid) in tagged {
            let Some(event) = events.iter().find(|event| event.guid == *guid) else {
                continue;
            };
            rows.push(vec![
                self.paint(kind, "31"),
                self.paint(&event_id(event), "33"),
                format_timestamp(event.start),
                format_timestamp(event.end),
                event.subject.clone(),
            ]);
        }
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, conflicts, events), fields(count = conflicts.len()))]
    pub fn print_conflicts(
        &mut self,
        conflicts: &[(Uuid, Uuid)],
        events: &[Event],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if conflicts.is_empty() {
            writeln!(out, "No conflicts.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Subject".to_string(),
            "Conflicts with".to_string(),
            "Subject".to_string(),
            "Kind".to_string(),
        ];
        let lookup = |guid: &Uuid| events.iter().find(|event| event.guid == *guid);
        let mut rows = Vec::with_capacity(conflicts.len());
        for (left, right) in conflicts {
            let (Some(left), Some(right)) = (lookup(left), lookup(right)) else {
                continue;
            };
            let kind = if left.is_block || right.is_block {
                self.paint("blocked", "31")
            } else {
                "overlap".to_string()
            };
            rows.push(vec![
                self.paint(&event_id(left), "33"),
                left.subject.clone(),
                self.paint(&event_id(right), "33"),
                right.subject.clone(),
                kind,
            ]);
        }
        write_table(&mut out, headers, rows)
    }

    pub fn print_mutation(
        &mut self,
        verb: &str,
        mutation: &Mutation,
        events: &[Event],
    ) -> anyhow::Result<()> {
        match mutation {
            Mutation::Applied(event) => {
                let mut out = io::stdout().lock();
                writeln!(
                    out,
                    "{verb} event {} ({} .. {}).",
                    event_id(event),
                    format_timestamp(event.start),
                    format_timestamp(event.end)
                )?;
                Ok(())
            }
            Mutation::Rejected(availability) => {
                {
                    let mut out = io::stdout().lock();
                    writeln!(out, "{}", self.paint("Rejected: the range is not available.", "31"))?;
                }
                self.print_availability(availability, events)
            }
        }
    }

    pub fn print_entries(&mut self, entries: &[(String, String)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec!["Setting".to_string(), "Value".to_string()];
        let rows = entries
            .iter()
            .map(|(key, value)| vec![key.clone(), value.clone()])
            .collect();
        write_table(&mut out, headers, rows)
    }

    fn dates_table(
        &self,
        dates: &[NaiveDate],
        selected: NaiveDate,
    ) -> (Vec<String>, Vec<Vec<String>>) {
        let headers = vec!["Date".to_string(), "Day".to_string(), "Week".to_string()];
        let rows = dates
            .iter()
            .map(|date| {
                let label = date.to_string();
                let label = if *date == selected {
                    self.paint(&label, "1")
                } else {
                    label
                };
                vec![
                    label,
                    date.weekday().to_string(),
                    week_number(*date).to_string(),
                ]
            })
            .collect();
        (headers, rows)
    }

    fn layout_table(&self, layout: &Layout<'_>) -> (Vec<String>, Vec<Vec<String>>) {
        let headers = vec![
            "Date".to_string(),
            "Time".to_string(),
            "Lane".to_string(),
            "Geometry".to_string(),
            "ID".to_string(),
            "Subject".to_string(),
        ];

        let mut rows = Vec::with_capacity(layout.segment_count());
        for segment in &layout.all_day_row {
            rows.push(self.segment_row(segment, day_span(segment)));
        }
        for day in &layout.days {
            for segment in &day.segments {
                rows.push(self.segment_row(segment, time_span(segment)));
            }
        }
        for row in &layout.month_rows {
            for segment in &row.segments {
                rows.push(self.segment_row(segment, day_span(segment)));
            }
        }
        (headers, rows)
    }

    fn segment_row(&self, segment: &ProcessedEventsData<'_>, time: String) -> Vec<String> {
        let geometry = segment
            .geometry
            .as_ref()
            .map(|geometry| geometry.to_css())
            .unwrap_or_default();
        let subject = if segment.event.is_block {
            format!("{} {}", segment.event.subject, self.paint("(blocked)", "31"))
        } else {
            segment.event.subject.clone()
        };
        vec![
            segment.date().to_string(),
            time,
            format!("{}/{}", segment.position_index + 1, segment.total_overlapping),
            geometry,
            self.paint(&event_id(segment.event), "33"),
            subject,
        ]
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn event_id(event: &Event) -> String {
    event
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn time_span(segment: &ProcessedEventsData<'_>) -> String {
    let end = if is_midnight(segment.end) && segment.end.date() > segment.start.date() {
        "24:00".to_string()
    } else {
        segment.end.format("%H:%M").to_string()
    };
    format!("{}-{}", segment.start.format("%H:%M"), end)
}

fn day_span(segment: &ProcessedEventsData<'_>) -> String {
    match segment.span() {
        1 => "all day".to_string(),
        days => format!("{days} days"),
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ViewType;
    use crate::session::SchedulerSession;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, d)
            .and_then(|date| date.and_hms_opt(h, m, 0))
            .expect("valid datetime")
    }

    #[test]
    fn table_pads_by_visible_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["ID".to_string(), "Subject".to_string()],
            vec![
                vec!["\x1b[33m1\x1b[0m".to_string(), "会議".to_string()],
                vec!["12".to_string(), "x".to_string()],
            ],
        )
        .expect("table");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID Subject ");
        assert_eq!(lines[1], "-- ------- ");
        assert_eq!(strip_ansi(lines[2]), "1  会議    ");
        assert_eq!(lines[3], "12 x       ");
    }

    #[test]
    fn layout_rows_show_lanes_and_midnight_ends() {
        let events = vec![
            Event::new("standup", at(16, 9, 0), at(16, 10, 0)),
            Event::new("pairing", at(16, 9, 30), at(16, 11, 0)),
            Event::new("late", at(16, 22, 0), at(17, 0, 0)),
        ];
        let session = SchedulerSession::builder()
            .selected_date(at(16, 0, 0).date())
            .view(ViewType::Day)
            .events(events)
            .build()
            .expect("session");
        let layout = session.layout();

        let renderer = Renderer::new(false);
        let (headers, rows) = renderer.layout_table(&layout);
        assert_eq!(headers.len(), 6);
        assert_eq!(rows.len(), 3);

        let standup = rows.iter().find(|row| row[5] == "standup").expect("standup row");
        assert_eq!(standup[1], "09:00-10:00");
        assert_eq!(standup[2], "1/2");
        assert_eq!(standup[4], "-");

        let late = rows.iter().find(|row| row[5] == "late").expect("late row");
        assert_eq!(late[1], "22:00-24:00");
        assert_eq!(late[2], "1/1");
    }

    #[test]
    fn dates_table_lists_weekdays() {
        let renderer = Renderer::new(false);
        let dates = [at(16, 0, 0).date(), at(17, 0, 0).date()];
        let (_, rows) = renderer.dates_table(&dates, dates[0]);
        assert_eq!(rows[0], vec!["2026-02-16", "Mon", "8"]);
        assert_eq!(rows[1][1], "Tue");
    }
}
