use chrono::{
  Datelike,
  Duration,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Timelike
};
use serde::{
  Deserialize,
  Serialize
};

pub const MINUTES_PER_DAY: u32 = 1_440;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
)]
pub enum ViewType {
  Day,
  Week,
  WorkWeek,
  Month
}

impl ViewType {
  pub fn from_key(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "day" => Some(Self::Day),
      | "week" => Some(Self::Week),
      | "workweek" | "work-week"
      | "work_week" => {
        Some(Self::WorkWeek)
      }
      | "month" => Some(Self::Month),
      | _ => None
    }
  }

  pub fn as_key(
    self
  ) -> &'static str {
    match self {
      | Self::Day => "Day",
      | Self::Week => "Week",
      | Self::WorkWeek => "WorkWeek",
      | Self::Month => "Month"
    }
  }

  /// Views laid out on a proportional
  /// hour axis.
  pub fn has_time_axis(
    self
  ) -> bool {
    !matches!(self, Self::Month)
  }
}

/// Inputs shared by every view when
/// computing the visible dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderDateOptions {
  pub interval:          u32,
  pub first_day_of_week: u8,
  pub work_days:         Vec<u8>,
  pub show_weekend:      bool,
  pub number_of_weeks:   Option<u32>,
  pub display_date:      Option<NaiveDate>
}

impl Default for RenderDateOptions {
  fn default() -> Self {
    Self {
      interval:          1,
      first_day_of_week: 0,
      work_days:         vec![
        1, 2, 3, 4, 5,
      ],
      show_weekend:      true,
      number_of_weeks:   None,
      display_date:      None
    }
  }
}

/// Day of week with Sunday as 0.
#[must_use]
pub fn day_index(
  date: NaiveDate
) -> u8 {
  date
    .weekday()
    .num_days_from_sunday()
    as u8
}

#[must_use]
pub fn normalize_date(
  dt: NaiveDateTime
) -> NaiveDateTime {
  dt.date().and_time(NaiveTime::MIN)
}

#[must_use]
pub fn midnight(
  date: NaiveDate
) -> NaiveDateTime {
  date.and_time(NaiveTime::MIN)
}

#[must_use]
pub fn is_midnight(
  dt: NaiveDateTime
) -> bool {
  dt.time() == NaiveTime::MIN
}

#[must_use]
pub fn minutes_of_day(
  dt: NaiveDateTime
) -> u32 {
  dt.hour() * 60 + dt.minute()
}

#[must_use]
pub fn is_same_day(
  a: NaiveDateTime,
  b: NaiveDateTime
) -> bool {
  a.year() == b.year()
    && a.month() == b.month()
    && a.day() == b.day()
}

#[must_use]
pub fn is_same_month(
  a: NaiveDate,
  b: NaiveDate
) -> bool {
  a.year() == b.year()
    && a.month() == b.month()
}

#[must_use]
pub fn is_work_day(
  date: NaiveDate,
  work_days: &[u8]
) -> bool {
  work_days.contains(&day_index(date))
}

/// Whether `work_days` names at least
/// one weekday index in `0..=6`.
#[must_use]
pub fn has_work_days(
  work_days: &[u8]
) -> bool {
  work_days.iter().any(|day| *day <= 6)
}

#[must_use]
pub fn is_weekend(
  date: NaiveDate,
  work_days: &[u8]
) -> bool {
  !is_work_day(date, work_days)
}

/// Number of calendar days an event
/// touches. An exact-midnight end
/// does not count its own day unless
/// the event is all-day.
#[must_use]
pub fn days_count(
  start: NaiveDateTime,
  end: NaiveDateTime,
  is_all_day: bool
) -> i64 {
  if is_same_day(start, end) {
    return 1;
  }

  let whole_days = (end.date()
    - start.date())
  .num_days();
  if is_all_day || !is_midnight(end) {
    whole_days + 1
  } else {
    whole_days
  }
}

#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

#[must_use]
pub fn add_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let total = date.year() * 12
    + date.month0() as i32
    + months;
  let year = total.div_euclid(12);
  let month =
    total.rem_euclid(12) as u32 + 1;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(date)
}

#[must_use]
pub fn first_date_of_month(
  date: NaiveDate
) -> NaiveDate {
  date.with_day(1).unwrap_or(date)
}

#[must_use]
pub fn last_date_of_month(
  date: NaiveDate
) -> NaiveDate {
  let first = first_date_of_month(date);
  add_days(add_months(first, 1), -1)
}

#[must_use]
pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  let Some(first) =
    NaiveDate::from_ymd_opt(
      year, month, 1
    )
  else {
    return 31;
  };
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  NaiveDate::from_ymd_opt(
    next_year, next_month, 1
  )
  .map(|next| {
    (next - first).num_days() as u32
  })
  .unwrap_or(31)
}

/// Start of the week containing
/// `date`, where `first_day_of_week`
/// counts from Sunday = 0.
#[must_use]
pub fn week_first_date(
  date: NaiveDate,
  first_day_of_week: u8
) -> NaiveDate {
  let day = i64::from(day_index(date));
  let first =
    i64::from(first_day_of_week % 7);
  let diff = if day < first {
    day + 7 - first
  } else {
    day - first
  };
  add_days(date, -diff)
}

#[must_use]
pub fn week_last_date(
  date: NaiveDate,
  first_day_of_week: u8
) -> NaiveDate {
  add_days(
    week_first_date(
      date,
      first_day_of_week
    ),
    6
  )
}

/// ISO-8601 week number.
#[must_use]
pub fn week_number(
  date: NaiveDate
) -> u32 {
  date.iso_week().week()
}

/// Parses `"HH:MM"` into minutes since
/// midnight. `"24:00"` is accepted as
/// the end of the day.
#[must_use]
pub fn parse_hour_minute(
  raw: &str
) -> Option<u32> {
  let (hours, minutes) =
    raw.trim().split_once(':')?;
  let hours: u32 =
    hours.trim().parse().ok()?;
  let minutes: u32 =
    minutes.trim().parse().ok()?;
  if minutes > 59 || hours > 24 {
    return None;
  }
  if hours == 24 && minutes != 0 {
    return None;
  }
  Some(hours * 60 + minutes)
}

#[must_use]
pub fn format_hour_minute(
  minutes: u32
) -> String {
  format!(
    "{:02}:{:02}",
    minutes / 60,
    minutes % 60
  )
}

/// Visible dates for a view.
#[tracing::instrument(skip(options))]
pub fn render_dates(
  view: ViewType,
  selected: NaiveDate,
  options: &RenderDateOptions
) -> Vec<NaiveDate> {
  let interval =
    i64::from(options.interval.max(1));
  let keep = |date: &NaiveDate| {
    options.show_weekend
      || is_work_day(
        *date,
        &options.work_days
      )
  };

  let dates = match view {
    | ViewType::Day => {
      day_view_dates(
        selected, interval, options
      )
    }
    | ViewType::Week => {
      let start = week_first_date(
        selected,
        options.first_day_of_week
      );
      (0..7 * interval)
        .map(|offset| {
          add_days(start, offset)
        })
        .filter(keep)
        .collect()
    }
    | ViewType::WorkWeek => {
      let start = week_first_date(
        selected,
        options.first_day_of_week
      );
      (0..7 * interval)
        .map(|offset| {
          add_days(start, offset)
        })
        .filter(|date| {
          is_work_day(
            *date,
            &options.work_days
          )
        })
        .collect()
    }
    | ViewType::Month => {
      let (start, count) =
        month_grid_bounds(
          selected, interval, options
        );
      (0..count)
        .map(|offset| {
          add_days(start, offset)
        })
        .filter(keep)
        .collect()
    }
  };

  tracing::debug!(
    view = view.as_key(),
    count = dates.len(),
    "computed render dates"
  );
  dates
}

fn day_view_dates(
  selected: NaiveDate,
  interval: i64,
  options: &RenderDateOptions
) -> Vec<NaiveDate> {
  if options.show_weekend {
    return (0..interval)
      .map(|offset| {
        add_days(selected, offset)
      })
      .collect();
  }
  if !has_work_days(&options.work_days) {
    return Vec::new();
  }

  let mut dates = Vec::new();
  let mut cursor = selected;
  while (dates.len() as i64) < interval
  {
    if is_work_day(
      cursor,
      &options.work_days
    ) {
      dates.push(cursor);
    }
    cursor = add_days(cursor, 1);
  }
  dates
}

fn month_grid_bounds(
  selected: NaiveDate,
  interval: i64,
  options: &RenderDateOptions
) -> (NaiveDate, i64) {
  if let Some(weeks) =
    options.number_of_weeks
    && weeks > 0
  {
    let anchor = options
      .display_date
      .unwrap_or(selected);
    let start = week_first_date(
      anchor,
      options.first_day_of_week
    );
    return (
      start,
      i64::from(weeks) * 7
    );
  }

  let first =
    first_date_of_month(selected);
  let last = last_date_of_month(
    add_months(
      first,
      (interval - 1) as i32
    )
  );
  let start = week_first_date(
    first,
    options.first_day_of_week
  );
  let end = week_last_date(
    last,
    options.first_day_of_week
  );
  (start, (end - start).num_days() + 1)
}

/// Groups render dates into rows that
/// share a week start.
#[must_use]
pub fn week_rows(
  dates: &[NaiveDate],
  first_day_of_week: u8
) -> Vec<Vec<NaiveDate>> {
  let mut rows: Vec<Vec<NaiveDate>> =
    Vec::new();
  let mut current_start: Option<
    NaiveDate
  > = None;

  for date in dates {
    let start = week_first_date(
      *date,
      first_day_of_week
    );
    if current_start != Some(start) {
      rows.push(Vec::new());
      current_start = Some(start);
    }
    if let Some(row) = rows.last_mut()
    {
      row.push(*date);
    }
  }

  rows
}
