pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod event;
pub mod geometry;
pub mod gesture;
pub mod navigation;
pub mod overlap;
pub mod render;
pub mod segment;
pub mod session;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting gridline CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg =
    config::SchedulerConfig::load(
      cli.config.as_deref()
    )?;
  cfg
    .apply_overrides(
      pre.rc_overrides.into_iter().chain(
        cli
          .rc_overrides
          .into_iter()
          .map(|kv| (kv.key, kv.value))
      )
    )
    .context(
      "failed to apply rc overrides"
    )?;

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let mut store =
    datastore::DataStore::open(
      &data_dir,
      cfg.fields.clone(),
      cfg.timezone()
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let mut renderer =
    render::Renderer::new(
      !cli.no_color
    );
  let request =
    commands::ViewRequest {
      date: cli.date,
      display_date: cli.display_date,
      view: cli.view,
      json: cli.json
    };
  let inv =
    cli::Invocation::parse(cli.rest)?;

  commands::dispatch(
    &mut store,
    &cfg,
    &mut renderer,
    &request,
    inv
  )?;

  info!("done");
  Ok(())
}
