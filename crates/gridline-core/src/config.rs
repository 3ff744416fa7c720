use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  warn
};

use crate::calendar::{
  MINUTES_PER_DAY,
  RenderDateOptions,
  ViewType,
  format_hour_minute,
  parse_hour_minute
};
use crate::event::FieldMapping;
use crate::geometry::{
  TimeScale,
  VisibleHours
};
use crate::session::SpannedPlacement;

const CONFIG_ENV: &str =
  "GRIDLINE_CONFIG";

#[derive(
  Debug,
  Clone,
  PartialEq,
  Serialize,
  Deserialize,
)]
pub struct SchedulerConfig {
  pub timezone:     Option<String>,
  #[serde(default)]
  pub view:         ViewConfig,
  #[serde(default)]
  pub time_scale:   TimeScaleConfig,
  #[serde(default)]
  pub layout:       LayoutConfig,
  #[serde(default)]
  pub fields:       FieldMapping,
  #[serde(default)]
  pub data:         DataConfig,
  #[serde(skip)]
  pub loaded_files: Vec<PathBuf>
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Serialize,
  Deserialize,
)]
pub struct ViewConfig {
  #[serde(
    default = "default_view"
  )]
  pub current:         ViewType,
  #[serde(
    default = "default_interval"
  )]
  pub interval:        u32,
  #[serde(default)]
  pub first_day_of_week: u8,
  #[serde(
    default = "default_work_days"
  )]
  pub work_days:       Vec<u8>,
  #[serde(default = "default_true")]
  pub show_weekend:    bool,
  pub number_of_weeks: Option<u32>,
  #[serde(default = "default_true")]
  pub allow_overlap:   bool,
  #[serde(default)]
  pub rtl:             bool,
  #[serde(default)]
  pub spanned_event_placement:
    SpannedPlacement
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Serialize,
  Deserialize,
)]
pub struct TimeScaleConfig {
  #[serde(default = "default_true")]
  pub enable:     bool,
  #[serde(
    default = "default_slot_interval"
  )]
  pub interval:   u32,
  #[serde(
    default = "default_slot_count"
  )]
  pub slot_count: u32,
  #[serde(
    default = "default_start_hour"
  )]
  pub start_hour: String,
  #[serde(
    default = "default_end_hour"
  )]
  pub end_hour:   String
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Serialize,
  Deserialize,
)]
pub struct LayoutConfig {
  #[serde(
    default = "default_row_height"
  )]
  pub row_height:     f64,
  #[serde(
    default = "default_row_gap"
  )]
  pub row_gap:        f64,
  #[serde(
    default = "default_drag_threshold"
  )]
  pub drag_threshold: f64
}

#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
  Deserialize,
)]
pub struct DataConfig {
  pub location: Option<String>
}

fn default_view() -> ViewType {
  ViewType::Week
}

fn default_interval() -> u32 {
  1
}

fn default_work_days() -> Vec<u8> {
  vec![1, 2, 3, 4, 5]
}

fn default_true() -> bool {
  true
}

fn default_slot_interval() -> u32 {
  60
}

fn default_slot_count() -> u32 {
  2
}

fn default_start_hour() -> String {
  "00:00".to_string()
}

fn default_end_hour() -> String {
  "24:00".to_string()
}

fn default_row_height() -> f64 {
  22.0
}

fn default_row_gap() -> f64 {
  2.0
}

fn default_drag_threshold() -> f64 {
  5.0
}

impl Default for ViewConfig {
  fn default() -> Self {
    Self {
      current:
        default_view(),
      interval:
        default_interval(),
      first_day_of_week: 0,
      work_days:
        default_work_days(),
      show_weekend: true,
      number_of_weeks: None,
      allow_overlap: true,
      rtl: false,
      spanned_event_placement:
        SpannedPlacement::default()
    }
  }
}

impl Default for TimeScaleConfig {
  fn default() -> Self {
    Self {
      enable:     true,
      interval:
        default_slot_interval(),
      slot_count:
        default_slot_count(),
      start_hour:
        default_start_hour(),
      end_hour:   default_end_hour()
    }
  }
}

impl Default for LayoutConfig {
  fn default() -> Self {
    Self {
      row_height:
        default_row_height(),
      row_gap:        default_row_gap(),
      drag_threshold:
        default_drag_threshold()
    }
  }
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      timezone:     None,
      view:         ViewConfig::default(),
      time_scale:
        TimeScaleConfig::default(),
      layout:
        LayoutConfig::default(),
      fields:
        FieldMapping::default(),
      data:         DataConfig::default(),
      loaded_files: vec![]
    }
  }
}

impl SchedulerConfig {
  /// Loads from `--config`, then
  /// `GRIDLINE_CONFIG`, then the user
  /// config directory; defaults when
  /// none exists.
  #[tracing::instrument(skip(
    config_override
  ))]
  pub fn load(
    config_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let Some(path) =
      resolve_config_path(
        config_override
      )?
    else {
      warn!(
        "no config file found; using \
         defaults"
      );
      return Ok(Self::default());
    };

    info!(config = %path.display(), "loading config");
    let path = expand_tilde(&path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;
    let mut cfg = Self::from_toml_str(
      &text
    )
    .with_context(|| {
      format!(
        "failed to parse {}",
        path.display()
      )
    })?;
    cfg.loaded_files.push(path);
    Ok(cfg)
  }

  pub fn from_toml_str(
    text: &str
  ) -> anyhow::Result<Self> {
    let mut cfg =
      toml::from_str::<Self>(text)
        .context(
          "invalid scheduler config"
        )?;
    cfg.sanitize();
    Ok(cfg)
  }

  /// Applies `key=value` overrides
  /// addressed by dotted path, e.g.
  /// `rc.view.show_weekend=false`.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) -> anyhow::Result<()>
  where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    let mut overrides =
      overrides.into_iter().peekable();
    if overrides.peek().is_none() {
      return Ok(());
    }

    let serialized =
      toml::to_string(&*self).context(
        "failed to serialize config"
      )?;
    let mut table = toml::from_str::<
      toml::Table
    >(&serialized)
    .context(
      "failed to reload config table"
    )?;

    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      set_dotted(
        &mut table,
        &key,
        parse_override_value(&v)
      )?;
    }

    let rendered =
      toml::to_string(&table).context(
        "failed to serialize \
         overrides"
      )?;
    let loaded_files =
      std::mem::take(
        &mut self.loaded_files
      );
    *self =
      Self::from_toml_str(&rendered)
        .context(
          "config override produced \
           an invalid config"
        )?;
    self.loaded_files = loaded_files;
    Ok(())
  }

  /// Clamps values the layout
  /// arithmetic cannot work with.
  pub fn sanitize(&mut self) {
    let view = &mut self.view;
    view.interval =
      view.interval.max(1);
    if view.first_day_of_week > 6 {
      warn!(
        first_day_of_week =
          view.first_day_of_week,
        "invalid first day of week; \
         using Sunday"
      );
      view.first_day_of_week = 0;
    }
    view
      .work_days
      .retain(|day| *day <= 6);
    view.work_days.sort_unstable();
    view.work_days.dedup();
    if view.number_of_weeks == Some(0)
    {
      view.number_of_weeks = None;
    }

    let scale = &mut self.time_scale;
    scale.interval =
      scale.interval.max(1);
    scale.slot_count =
      scale.slot_count.max(1);

    let start = parse_hour_minute(
      &scale.start_hour
    );
    let end =
      parse_hour_minute(&scale.end_hour);
    match (start, end) {
      | (Some(start), Some(end))
        if start < end => {}
      | _ => {
        warn!(
          start = %scale.start_hour,
          end = %scale.end_hour,
          "invalid visible hours; \
           showing the whole day"
        );
        scale.start_hour =
          default_start_hour();
        scale.end_hour =
          default_end_hour();
      }
    }

    let layout = &mut self.layout;
    if layout.row_height.is_nan()
      || layout.row_height <= 0.0
    {
      layout.row_height =
        default_row_height();
    }
    if layout.row_gap.is_nan()
      || layout.row_gap < 0.0
    {
      layout.row_gap =
        default_row_gap();
    }
    if layout.drag_threshold.is_nan()
      || layout.drag_threshold < 0.0
    {
      layout.drag_threshold =
        default_drag_threshold();
    }
  }

  pub fn time_scale(
    &self
  ) -> TimeScale {
    TimeScale {
      enable:     self
        .time_scale
        .enable,
      interval:   self
        .time_scale
        .interval,
      slot_count: self
        .time_scale
        .slot_count
    }
  }

  pub fn visible_hours(
    &self
  ) -> VisibleHours {
    let start = parse_hour_minute(
      &self.time_scale.start_hour
    )
    .unwrap_or(0);
    let end = parse_hour_minute(
      &self.time_scale.end_hour
    )
    .unwrap_or(MINUTES_PER_DAY);
    VisibleHours::new(start, end)
  }

  /// Minutes between snapped drag and
  /// resize positions.
  pub fn slot_minutes(&self) -> u32 {
    self.time_scale().slot_minutes()
  }

  pub fn render_options(
    &self,
    display_date: Option<NaiveDate>
  ) -> RenderDateOptions {
    RenderDateOptions {
      interval: self.view.interval,
      first_day_of_week: self
        .view
        .first_day_of_week,
      work_days: self
        .view
        .work_days
        .clone(),
      show_weekend: self
        .view
        .show_weekend,
      number_of_weeks: self
        .view
        .number_of_weeks,
      display_date
    }
  }

  /// Configured zone, falling back to
  /// UTC when unset or unknown.
  pub fn timezone(&self) -> Tz {
    let Some(raw) =
      self.timezone.as_deref()
    else {
      return Tz::UTC;
    };
    match raw.trim().parse::<Tz>() {
      | Ok(tz) => tz,
      | Err(err) => {
        warn!(
          timezone = %raw,
          error = %err,
          "failed to parse timezone id; using UTC"
        );
        Tz::UTC
      }
    }
  }

  /// Flattened `key = value` view of
  /// the effective settings.
  pub fn entries(
    &self
  ) -> Vec<(String, String)> {
    let view = &self.view;
    let scale = &self.time_scale;
    let work_days = view
      .work_days
      .iter()
      .map(u8::to_string)
      .collect::<Vec<_>>()
      .join(",");
    vec![
      (
        "timezone".to_string(),
        self.timezone().to_string()
      ),
      (
        "view.current".to_string(),
        view.current.as_key().to_string()
      ),
      (
        "view.interval".to_string(),
        view.interval.to_string()
      ),
      (
        "view.first_day_of_week"
          .to_string(),
        view
          .first_day_of_week
          .to_string()
      ),
      (
        "view.work_days".to_string(),
        work_days
      ),
      (
        "view.show_weekend".to_string(),
        view.show_weekend.to_string()
      ),
      (
        "view.allow_overlap"
          .to_string(),
        view.allow_overlap.to_string()
      ),
      (
        "view.rtl".to_string(),
        view.rtl.to_string()
      ),
      (
        "view.spanned_event_placement"
          .to_string(),
        format!(
          "{:?}",
          view.spanned_event_placement
        )
      ),
      (
        "time_scale.enable".to_string(),
        scale.enable.to_string()
      ),
      (
        "time_scale.slot_minutes"
          .to_string(),
        self.slot_minutes().to_string()
      ),
      (
        "time_scale.hours".to_string(),
        format!(
          "{}-{}",
          format_hour_minute(
            self.visible_hours().start
          ),
          format_hour_minute(
            self.visible_hours().end
          )
        )
      ),
    ]
  }
}

fn parse_override_value(
  raw: &str
) -> toml::Value {
  let trimmed = raw.trim();
  match toml::from_str::<toml::Table>(
    &format!("value = {trimmed}")
  ) {
    | Ok(mut table) => match table
      .remove("value")
    {
      | Some(
        value @ (toml::Value::Boolean(_)
        | toml::Value::Integer(_)
        | toml::Value::Float(_)
        | toml::Value::Array(_)
        | toml::Value::String(_))
      ) => value,
      // Dates and clock times stay text.
      | _ => toml::Value::String(
        trimmed.to_string()
      )
    },
    | Err(_) => {
      toml::Value::String(
        trimmed.to_string()
      )
    }
  }
}

fn set_dotted(
  table: &mut toml::Table,
  key: &str,
  value: toml::Value
) -> anyhow::Result<()> {
  let mut parts: Vec<&str> =
    key.split('.').collect();
  let Some(leaf) = parts.pop() else {
    return Err(anyhow!(
      "empty config key"
    ));
  };
  if leaf.trim().is_empty() {
    return Err(anyhow!(
      "empty config key: {key}"
    ));
  }

  let mut cursor = table;
  for part in parts {
    let entry = cursor
      .entry(part.to_string())
      .or_insert_with(|| {
        toml::Value::Table(
          toml::Table::new()
        )
      });
    cursor =
      entry.as_table_mut().ok_or_else(
        || {
          anyhow!(
            "config key {key} crosses \
             non-table value {part}"
          )
        }
      )?;
  }
  cursor.insert(leaf.to_string(), value);
  Ok(())
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &SchedulerConfig,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.data.location.as_deref()
  {
    expand_tilde(Path::new(cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_config_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(config_env) =
    std::env::var(CONFIG_ENV)
  {
    if config_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      config_env
    )));
  }

  let Some(config_dir) =
    dirs::config_dir()
  else {
    warn!(
      "cannot determine config \
       directory"
    );
    return Ok(None);
  };
  let candidate = config_dir
    .join("gridline")
    .join("gridline.toml");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  if let Some(data_dir) =
    dirs::data_dir()
  {
    return Ok(data_dir.join("gridline"));
  }
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".gridline"))
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}
