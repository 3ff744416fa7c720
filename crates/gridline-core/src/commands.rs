use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::calendar::{ViewType, midnight};
use crate::cli::Invocation;
use crate::config::SchedulerConfig;
use crate::datastore::DataStore;
use crate::datetime::{parse_date_arg, parse_date_expr, parse_duration_expr};
use crate::event::{Event, EventId};
use crate::gesture::{DropSource, ResizeHandle, recalculate_drag, recalculate_resize};
use crate::navigation::{NavigationDirection, navigate_to_today};
use crate::overlap::find_conflicts;
use crate::render::Renderer;
use crate::session::SchedulerSession;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "dates", "layout", "next", "prev", "today", "add", "move", "resize", "delete", "check",
        "undo", "export", "show", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// View selection shared by every command.
#[derive(Debug, Clone, Default)]
pub struct ViewRequest {
    pub date: Option<String>,
    pub display_date: Option<String>,
    pub view: Option<String>,
    pub json: bool,
}

#[instrument(skip(store, cfg, renderer, request, inv))]
pub fn dispatch(
    store: &mut DataStore,
    cfg: &SchedulerConfig,
    renderer: &mut Renderer,
    request: &ViewRequest,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();
    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "undo" => return cmd_undo(store),
        "export" => return cmd_export(store, cfg, request),
        "show" => return cmd_show(cfg, renderer),
        "help" => return cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let mut session = open_session(store, cfg, request, now)?;
    match command {
        "dates" => cmd_dates(&session, renderer, request),
        "layout" => print_layout(&session, renderer, request),
        "next" => cmd_navigate(
            &mut session,
            renderer,
            request,
            NavigationDirection::Next,
            &inv.command_args,
        ),
        "prev" => cmd_navigate(
            &mut session,
            renderer,
            request,
            NavigationDirection::Previous,
            &inv.command_args,
        ),
        "today" => {
            session.today(now);
            print_layout(&session, renderer, request)
        }
        "add" => cmd_add(store, &mut session, renderer, &inv.command_args, now),
        "move" => cmd_move(store, &mut session, renderer, &inv.command_args, now),
        "resize" => cmd_resize(store, &mut session, renderer, &inv.command_args, now),
        "delete" => cmd_delete(store, &mut session, &inv.command_args),
        "check" => cmd_check(store, &session, renderer, &inv.command_args, now),
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn open_session(
    store: &DataStore,
    cfg: &SchedulerConfig,
    request: &ViewRequest,
    now: DateTime<Utc>,
) -> anyhow::Result<SchedulerSession> {
    let tz = cfg.timezone();
    let selected = match request.date.as_deref() {
        Some(expr) => parse_date_arg(expr, now, tz).context("invalid --date")?,
        None => navigate_to_today(tz, now),
    };
    let display = request
        .display_date
        .as_deref()
        .map(|expr| parse_date_arg(expr, now, tz).context("invalid --display-date"))
        .transpose()?;

    let mut builder = SchedulerSession::builder()
        .config(cfg.clone())
        .selected_date(selected)
        .display_date(display)
        .events(store.events().to_vec());
    if let Some(raw) = request.view.as_deref() {
        let view = ViewType::from_key(raw).ok_or_else(|| anyhow!("unknown view: {raw}"))?;
        builder = builder.view(view);
    }
    builder.build()
}

fn print_layout(
    session: &SchedulerSession,
    renderer: &mut Renderer,
    request: &ViewRequest,
) -> anyhow::Result<()> {
    let layout = session.layout();
    if request.json {
        println!("{}", serde_json::to_string_pretty(&layout)?);
        return Ok(());
    }
    renderer.print_layout(&layout)
}

#[instrument(skip(session, renderer, request))]
fn cmd_dates(
    session: &SchedulerSession,
    renderer: &mut Renderer,
    request: &ViewRequest,
) -> anyhow::Result<()> {
    let dates = session.render_dates();
    if request.json {
        println!("{}", serde_json::to_string_pretty(&dates)?);
        return Ok(());
    }
    renderer.print_dates(&dates, session.selected_date())
}

#[instrument(skip(session, renderer, request, args))]
fn cmd_navigate(
    session: &mut SchedulerSession,
    renderer: &mut Renderer,
    request: &ViewRequest,
    direction: NavigationDirection,
    args: &[String],
) -> anyhow::Result<()> {
    let steps = match args.first() {
        Some(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("expected a step count, got: {raw}"))?,
        None => 1,
    };
    for _ in 0..steps {
        session.navigate(direction);
    }
    info!(selected = %session.selected_date(), steps, "navigated");
    print_layout(session, renderer, request)
}

/// `key:value` modifiers and free words of `add` and `check`.
#[derive(Debug, Default, PartialEq)]
struct EventArgs {
    words: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    duration: Option<String>,
    all_day: Option<bool>,
    block: Option<bool>,
    readonly: Option<bool>,
    location: Option<String>,
    description: Option<String>,
    id: Option<String>,
}

fn parse_event_args(args: &[String]) -> anyhow::Result<EventArgs> {
    let mut parsed = EventArgs::default();
    for arg in args {
        let Some((key, value)) = arg.split_once(':') else {
            parsed.words.push(arg.clone());
            continue;
        };
        let value = value.to_string();
        match key.to_ascii_lowercase().as_str() {
            "start" | "from" => parsed.start = Some(value),
            "end" | "to" | "until" => parsed.end = Some(value),
            "dur" | "duration" => parsed.duration = Some(value),
            "allday" | "all_day" => parsed.all_day = Some(parse_flag(&value)?),
            "block" => parsed.block = Some(parse_flag(&value)?),
            "readonly" | "ro" => parsed.readonly = Some(parse_flag(&value)?),
            "location" | "loc" => parsed.location = Some(value),
            "desc" | "description" => parsed.description = Some(value),
            "id" => parsed.id = Some(value),
            _ => parsed.words.push(arg.clone()),
        }
    }
    Ok(parsed)
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Ok(true),
        "0" | "n" | "no" | "off" | "false" => Ok(false),
        other => Err(anyhow!("expected yes/no, got: {other}")),
    }
}

fn build_event(
    parsed: EventArgs,
    subject: String,
    cfg: &SchedulerConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<Event> {
    let tz = cfg.timezone();
    let mut event = if parsed.all_day.unwrap_or(false) {
        let first = match parsed.start.as_deref() {
            Some(expr) => parse_date_arg(expr, now, tz)?,
            None => navigate_to_today(tz, now),
        };
        let last = match parsed.end.as_deref() {
            Some(expr) => parse_date_arg(expr, now, tz)?,
            None => first,
        };
        if last < first {
            return Err(anyhow!("end date {last} precedes start date {first}"));
        }
        Event::all_day(subject, first, last)
    } else {
        let start_expr = parsed
            .start
            .as_deref()
            .ok_or_else(|| anyhow!("a start is required, e.g. start:tomorrow"))?;
        let start = parse_date_expr(start_expr, now, tz)?;
        let end = match (parsed.end.as_deref(), parsed.duration.as_deref()) {
            (Some(expr), _) => parse_date_expr(expr, now, tz)?,
            (None, Some(raw)) => start + parse_duration_expr(raw)?,
            (None, None) => start + Duration::minutes(i64::from(cfg.slot_minutes())),
        };
        if end < start {
            return Err(anyhow!("end {end} precedes start {start}"));
        }
        Event::new(subject, start, end)
    };

    event.is_block = parsed.block.unwrap_or(false);
    event.is_readonly = parsed.readonly.unwrap_or(false);
    event.location = parsed.location;
    event.description = parsed.description;
    event.id = parsed.id.map(|raw| match raw.parse::<i64>() {
        Ok(number) => EventId::Number(number),
        Err(_) => EventId::Text(raw),
    });
    Ok(event)
}

#[instrument(skip(store, session, renderer, args, now))]
fn cmd_add(
    store: &mut DataStore,
    session: &mut SchedulerSession,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    let parsed = parse_event_args(args)?;
    let subject = parsed.words.join(" ");
    if subject.trim().is_empty() {
        return Err(anyhow!("add requires a subject"));
    }
    let event = build_event(parsed, subject, session.config(), now)?;
    let mutation = session.add_event(store, event)?;
    renderer.print_mutation("Created", &mutation, session.events())
}

fn resolve_event(store: &DataStore, reference: Option<&String>) -> anyhow::Result<Event> {
    let reference = reference.ok_or_else(|| anyhow!("an event id is required"))?;
    let event = store
        .find(reference)
        .cloned()
        .ok_or_else(|| anyhow!("no event matches {reference}"))?;
    if event.is_readonly {
        return Err(anyhow!("event {reference} is read-only"));
    }
    Ok(event)
}

/// Day-based edits apply to all-day events and to the month grid.
fn drop_source(session: &SchedulerSession, event: &Event) -> DropSource {
    if session.view() == ViewType::Month {
        DropSource::MonthCell
    } else if event.is_all_day {
        DropSource::AllDayRow
    } else {
        DropSource::TimeSlot
    }
}

#[instrument(skip(store, session, renderer, args, now))]
fn cmd_move(
    store: &mut DataStore,
    session: &mut SchedulerSession,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command move");

    let event = resolve_event(store, args.first())?;
    let target_expr = args
        .get(1)
        .map(|raw| raw.strip_prefix("to:").unwrap_or(raw.as_str()))
        .ok_or_else(|| anyhow!("move requires a target, e.g. move 3 tomorrow"))?;
    let tz = session.config().timezone();
    let source = drop_source(session, &event);
    let target = match source {
        DropSource::TimeSlot => parse_date_expr(target_expr, now, tz)?,
        DropSource::AllDayRow | DropSource::MonthCell => {
            midnight(parse_date_arg(target_expr, now, tz)?)
        }
    };

    let moved = recalculate_drag(
        &event,
        target,
        source,
        Duration::zero(),
        session.config().slot_minutes(),
    );
    debug!(?source, from = %event.start, to = %moved.start, "recalculated drag");
    let mutation = session.save_event(store, moved)?;
    renderer.print_mutation("Moved", &mutation, session.events())
}

#[instrument(skip(store, session, renderer, args, now))]
fn cmd_resize(
    store: &mut DataStore,
    session: &mut SchedulerSession,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command resize");

    let event = resolve_event(store, args.first())?;
    let edge = args
        .get(1)
        .ok_or_else(|| anyhow!("resize requires start:<date> or end:<date>"))?;
    let (handle, expr) = if let Some(expr) = edge.strip_prefix("start:") {
        (ResizeHandle::Start, expr)
    } else if let Some(expr) = edge.strip_prefix("end:") {
        (ResizeHandle::End, expr)
    } else {
        return Err(anyhow!("resize requires start:<date> or end:<date>, got: {edge}"));
    };

    let tz = session.config().timezone();
    let slot_minutes = session.config().slot_minutes();
    let source = drop_source(session, &event);
    let target = match (source, handle) {
        (DropSource::TimeSlot, ResizeHandle::Start) => parse_date_expr(expr, now, tz)?,
        // The end edge lands on the end of the target cell; aim at the
        // cell that ends at the requested time.
        (DropSource::TimeSlot, ResizeHandle::End) => {
            parse_date_expr(expr, now, tz)? - Duration::minutes(i64::from(slot_minutes))
        }
        _ => midnight(parse_date_arg(expr, now, tz)?),
    };

    let resized = recalculate_resize(&event, handle, target, source, slot_minutes);
    debug!(?handle, start = %resized.start, end = %resized.end, "recalculated resize");
    let mutation = session.save_event(store, resized)?;
    renderer.print_mutation("Resized", &mutation, session.events())
}

#[instrument(skip(store, session, args))]
fn cmd_delete(
    store: &mut DataStore,
    session: &mut SchedulerSession,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command delete");

    let event = resolve_event(store, args.first())?;
    match session.delete_event(store, event.guid)? {
        Some(removed) => println!(
            "Deleted event {}.",
            removed
                .id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| removed.guid.to_string())
        ),
        None => println!("Nothing deleted."),
    }
    Ok(())
}

#[instrument(skip(store, session, renderer, args, now))]
fn cmd_check(
    store: &DataStore,
    session: &SchedulerSession,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    if args.is_empty() {
        let conflicts = find_conflicts(store.events());
        info!(count = conflicts.len(), "listed conflicts");
        return renderer.print_conflicts(&conflicts, store.events());
    }

    let parsed = parse_event_args(args)?;
    let subject = parsed.words.join(" ");
    let candidate = build_event(parsed, subject, session.config(), now)?;
    let availability = session.check_availability(&candidate);
    renderer.print_availability(&availability, session.events())
}

#[instrument(skip(store))]
fn cmd_undo(store: &mut DataStore) -> anyhow::Result<()> {
    if store.undo()? {
        println!("Undid the last change.");
    } else {
        println!("Nothing to undo.");
    }
    Ok(())
}

#[instrument(skip(store, cfg, request))]
fn cmd_export(
    store: &DataStore,
    cfg: &SchedulerConfig,
    request: &ViewRequest,
) -> anyhow::Result<()> {
    if request.json {
        println!("{}", serde_json::to_string_pretty(store.events())?);
        return Ok(());
    }
    for event in store.events() {
        let record = Value::Object(event.to_record(&cfg.fields));
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

fn cmd_show(cfg: &SchedulerConfig, renderer: &mut Renderer) -> anyhow::Result<()> {
    for file in &cfg.loaded_files {
        println!("Config file: {}", file.display());
    }
    renderer.print_entries(&cfg.entries())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "gridline [options] <command> [args]\n\n\
         Options: -v/-q, --rc key=value, --config <file>, --data <dir>,\n\
         \x20        --date <expr>, --view day|week|workweek|month, --json, --no-color\n\n\
         Commands:\n\
         \x20 dates                       render dates of the selected view\n\
         \x20 layout                      lay out events (default)\n\
         \x20 next|prev [n]               move the selected date and lay out\n\
         \x20 today                       lay out the view containing today\n\
         \x20 add <subject> start:<date> [end:<date>|dur:<1h30m>] [allday:yes] [block:yes]\n\
         \x20 move <id> <date>            move an event, keeping its duration\n\
         \x20 resize <id> start:<date>|end:<date>\n\
         \x20 delete <id>\n\
         \x20 check [start:<date> end:<date>]  availability of a range, or all conflicts\n\
         \x20 undo | export | show | help | version"
    );
    Ok(())
}
