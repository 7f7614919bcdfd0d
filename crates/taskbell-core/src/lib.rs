pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod error;
pub mod filter;
pub mod notify;
pub mod render;
pub mod store;
pub mod task;
pub mod timer;
pub mod tracker;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::datastore::{
  DataStore,
  MemoryStore,
  SnapshotStore
};
use crate::notify::Notifier;
use crate::store::TaskStore;
use crate::tracker::Tracker;

#[tracing::instrument(skip_all)]
pub async fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    ephemeral = cli.ephemeral,
    "starting taskbell"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .rc_overrides
      .iter()
      .map(|kv| {
        (kv.key.clone(), kv.value.clone())
      })
  );
  debug!(files = ?cfg.loaded_files, "configuration loaded");

  let backend: Box<dyn SnapshotStore> =
    if cli.ephemeral {
      Box::new(MemoryStore::new())
    } else {
      let data_dir =
        config::resolve_data_dir(
          &cfg,
          cli.data.as_deref()
        )
        .context(
          "failed to resolve data \
           directory"
        )?;
      let store = DataStore::open(
        &data_dir,
        &cfg.storage_key()
      )
      .with_context(|| {
        format!(
          "failed to open datastore at \
           {}",
          data_dir.display()
        )
      })?;
      Box::new(store)
    };

  let renderer =
    render::Renderer::new(&cfg)?;
  let (notifier, mut notices) =
    Notifier::channel();
  let mut tracker = Tracker::new(
    TaskStore::open(backend),
    notifier
  )
  .with_view(cfg.default_view()?);

  match cli.one_shot() {
    | Some(line) => {
      commands::run_once(
        &mut tracker,
        &renderer,
        &mut notices,
        &line
      )
      .await?
    }
    | None => {
      commands::run_shell(
        &mut tracker,
        &renderer,
        &mut notices
      )
      .await?
    }
  }

  info!("done");
  Ok(())
}
