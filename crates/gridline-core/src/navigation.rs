use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};

use crate::calendar::{
  RenderDateOptions,
  ViewType,
  add_days,
  add_months,
  has_work_days,
  is_work_day
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub enum NavigationDirection {
  Previous,
  Next
}

impl NavigationDirection {
  pub fn from_key(
    key: &str
  ) -> Option<Self> {
    match key
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "next" | "forward" => {
        Some(Self::Next)
      }
      | "prev" | "previous"
      | "back" => {
        Some(Self::Previous)
      }
      | _ => None
    }
  }

  fn sign(self) -> i64 {
    match self {
      | Self::Previous => -1,
      | Self::Next => 1
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationOptions {
  pub view:         ViewType,
  pub interval:     u32,
  pub show_weekend: bool,
  pub work_days:    Vec<u8>
}

impl NavigationOptions {
  pub fn new(
    view: ViewType,
    render: &RenderDateOptions
  ) -> Self {
    Self {
      view,
      interval: render.interval,
      show_weekend: render
        .show_weekend,
      work_days: render
        .work_days
        .clone()
    }
  }
}

/// Moves the selected date one
/// navigation step in `direction`.
#[tracing::instrument(skip(options), fields(view = ?options.view))]
pub fn navigate(
  selected: NaiveDate,
  direction: NavigationDirection,
  options: &NavigationOptions
) -> NaiveDate {
  let steps = i64::from(
    options.interval.max(1)
  ) * direction.sign();

  let next = match options.view {
    | ViewType::Day => {
      if options.show_weekend
        || !has_work_days(
          &options.work_days
        )
      {
        add_days(selected, steps)
      } else {
        step_work_days(
          selected,
          steps,
          &options.work_days
        )
      }
    }
    | ViewType::Week
    | ViewType::WorkWeek => {
      add_days(selected, steps * 7)
    }
    | ViewType::Month => {
      add_months(
        selected,
        steps as i32
      )
    }
  };

  tracing::debug!(%selected, %next, "navigated");
  next
}

fn step_work_days(
  from: NaiveDate,
  steps: i64,
  work_days: &[u8]
) -> NaiveDate {
  let unit = steps.signum();
  let mut remaining = steps.abs();
  let mut cursor = from;
  while remaining > 0 {
    cursor = add_days(cursor, unit);
    if is_work_day(cursor, work_days) {
      remaining -= 1;
    }
  }
  cursor
}

/// Wall-clock date of `now` in the
/// configured zone.
#[must_use]
pub fn navigate_to_today(
  timezone: Tz,
  now: DateTime<Utc>
) -> NaiveDate {
  now
    .with_timezone(&timezone)
    .date_naive()
}
