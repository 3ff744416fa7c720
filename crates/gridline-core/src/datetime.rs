use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  NaiveDateTime,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

use crate::calendar::{
  add_days,
  midnight
};

/// Parses a CLI date expression into
/// a wall-clock time in `tz`.
///
/// Clock times resolve on today's
/// date; weekday and month names
/// resolve to their next occurrence.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<NaiveDateTime> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let local_now =
    now.with_timezone(&tz).naive_local();
  let today = local_now.date();

  match lower.as_str() {
    | "now" => return Ok(local_now),
    | "today" => {
      return Ok(midnight(today));
    }
    | "tomorrow" => {
      return Ok(midnight(add_days(
        today, 1
      )));
    }
    | "yesterday" => {
      return Ok(midnight(add_days(
        today, -1
      )));
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(midnight(
      next_weekday_date(
        today,
        target_weekday
      )
    ));
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    return today
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time for today"
        )
      });
  }

  if let Some(target_month) =
    parse_month_name(&lower)
  {
    let mut year = today.year();
    if target_month <= today.month() {
      year = year.saturating_add(1);
    }
    let date = NaiveDate::from_ymd_opt(
      year,
      target_month,
      1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month/year \
         candidate"
      )
    })?;
    return Ok(midnight(date));
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[wdhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "w" => Duration::weeks(num),
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | "m" => Duration::minutes(num),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ))
      }
    };

    // Whole-day offsets count from
    // midnight.
    let base = if matches!(unit, "w" | "d")
    {
      midnight(today)
    } else {
      local_now
    };
    return Ok(
      if sign == "-" {
        base - duration
      } else {
        base + duration
      }
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(
      dt.with_timezone(&tz).naive_local()
    );
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(midnight(date));
  }

  for fmt in [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Ok(ndt);
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     month names (e.g. march), clock \
     times (e.g. 3:30pm or 15:30), \
     +Nw/+Nd/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

/// Date part of a date expression.
pub fn parse_date_arg(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<NaiveDate> {
  parse_date_expr(input, now, tz)
    .map(|dt| dt.date())
}

/// Parses durations such as `90m`,
/// `2h`, `1h30m` or `1d`.
pub fn parse_duration_expr(
  input: &str
) -> anyhow::Result<Duration> {
  let token =
    input.trim().to_ascii_lowercase();
  let dur_re = Regex::new(
    r"^(?:(?P<days>\d+)d)?(?:(?P<hours>\d+)h)?(?:(?P<minutes>\d+)m(?:in)?)?$",
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  let caps = dur_re
    .captures(&token)
    .filter(|_| !token.is_empty())
    .ok_or_else(|| {
      anyhow!(
        "unrecognized duration: \
         {input} (e.g. 90m, 2h, \
         1h30m, 1d)"
      )
    })?;

  let part = |name: &str| -> anyhow::Result<i64> {
    caps
      .name(name)
      .map(|m| m.as_str().parse::<i64>())
      .transpose()
      .with_context(|| {
        format!(
          "invalid {name} in \
           duration {input}"
        )
      })
      .map(|value| value.unwrap_or(0))
  };

  let total = Duration::days(
    part("days")?
  ) + Duration::hours(part("hours")?)
    + Duration::minutes(
      part("minutes")?
    );
  if total <= Duration::zero() {
    return Err(anyhow!(
      "duration must be positive: \
       {input}"
    ));
  }
  Ok(total)
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm_match
      .as_str()
      .to_ascii_lowercase()
      .as_str()
    {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => {
      Some(9)
    }
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}
