use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datastore::DEFAULT_KEY;
use crate::filter::ViewMode;

pub const RC_ENV: &str = "TASKBELLRC";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "data.location".to_string(),
      "~/.taskbell".to_string()
    );
    map.insert(
      "storage.key".to_string(),
      DEFAULT_KEY.to_string()
    );
    map.insert(
      "view.default".to_string(),
      ViewMode::default().to_string()
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then the rc file from
  /// `rc_override`, `$TASKBELLRC` or
  /// `~/.taskbellrc`, whichever is found
  /// first.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      debug!("no rc file found; using defaults");
    }

    Ok(cfg)
  }

  /// Parses rc text directly, resolving
  /// includes against `base_dir`.
  pub fn from_str_in(
    text: &str,
    base_dir: &Path
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();
    cfg.load_text(
      text,
      Path::new("<inline>"),
      base_dir
    )?;
    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Unset keys give `None`; values
  /// other than on/off spellings are
  /// an error.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    parse_bool(raw).map(Some).ok_or_else(
      || {
        anyhow!(
          "invalid {key}: {raw} \
           (expected on or off)"
        )
      }
    )
  }

  pub fn storage_key(&self) -> String {
    self
      .get("storage.key")
      .filter(|key| {
        !key.trim().is_empty()
      })
      .unwrap_or_else(|| {
        DEFAULT_KEY.to_string()
      })
  }

  pub fn default_view(
    &self
  ) -> anyhow::Result<ViewMode> {
    let raw = self
      .get("view.default")
      .unwrap_or_default();
    raw.parse::<ViewMode>().map_err(
      |err| {
        anyhow!(
          "invalid view.default: \
           {err}"
        )
      }
    )
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    self.load_text(
      &text, &path, &base_dir
    )
  }

  fn load_text(
    &mut self,
    text: &str,
    origin: &Path,
    base_dir: &Path
  ) -> anyhow::Result<()> {
    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = raw_line
        .split_once('#')
        .map_or(raw_line, |(before, _)| {
          before
        })
        .trim();
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            base_dir,
            include_rest.trim()
          )?;
        if self
          .loaded_files
          .contains(&include_path)
        {
          warn!(include = %include_path.display(), "include cycle; skipping");
          continue;
        }
        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            origin.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
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

fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping rc file"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".taskbellrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".taskbell"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
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

fn parse_bool(
  raw: &str
) -> Option<bool> {
  match raw
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "on" | "yes" | "true" | "1" => {
      Some(true)
    }
    | "off" | "no" | "false" | "0" => {
      Some(false)
    }
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    resolve_data_dir
  };
  use crate::filter::ViewMode;

  #[test]
  fn defaults_cover_every_key() {
    let cfg = Config::default();
    assert_eq!(
      cfg.storage_key(),
      "tasks"
    );
    assert_eq!(
      cfg
        .default_view()
        .expect("view"),
      ViewMode::Incomplete
    );
    assert_eq!(
      cfg
        .get_bool("color")
        .expect("color"),
      Some(true)
    );
  }

  #[test]
  fn parses_keys_comments_and_blank_lines()
  {
    let temp =
      tempdir().expect("tempdir");
    let cfg = Config::from_str_in(
      "# settings\n\nview.default = \
       all  # show everything\n\
       color=off\n",
      temp.path()
    )
    .expect("parse");

    assert_eq!(
      cfg
        .default_view()
        .expect("view"),
      ViewMode::All
    );
    assert_eq!(
      cfg
        .get_bool("color")
        .expect("color"),
      Some(false)
    );
  }

  #[test]
  fn unknown_switch_values_are_errors()
  {
    let temp =
      tempdir().expect("tempdir");
    let mut cfg = Config::from_str_in(
      "color=sometimes\n",
      temp.path()
    )
    .expect("parse");

    assert!(
      cfg.get_bool("color").is_err()
    );
    assert_eq!(
      cfg
        .get_bool("missing")
        .expect("missing"),
      None
    );

    cfg.apply_overrides([(
      "rc.color".to_string(),
      "NO".to_string()
    )]);
    assert_eq!(
      cfg
        .get_bool("color")
        .expect("color"),
      Some(false)
    );
  }

  #[test]
  fn rejects_lines_without_equals() {
    let temp =
      tempdir().expect("tempdir");
    let err = Config::from_str_in(
      "color on\n",
      temp.path()
    )
    .expect_err("invalid line");
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn includes_are_resolved_relative_to_base()
   {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("extra.rc"),
      "storage.key=chores\n"
    )
    .expect("write include");

    let cfg = Config::from_str_in(
      "include extra.rc\ninclude \
       missing.rc\n",
      temp.path()
    )
    .expect("parse");
    assert_eq!(
      cfg.storage_key(),
      "chores"
    );
    assert_eq!(
      cfg.loaded_files.len(),
      1
    );
  }

  #[test]
  fn overrides_win_and_strip_rc_prefix()
  {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![
      (
        "rc.view.default".to_string(),
        "completed".to_string()
      ),
      (
        "storage.key".to_string(),
        " ".to_string()
      ),
    ]);
    assert_eq!(
      cfg
        .default_view()
        .expect("view"),
      ViewMode::Completed
    );
    assert_eq!(
      cfg.storage_key(),
      "tasks"
    );
  }

  #[test]
  fn bad_default_view_is_an_error() {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![(
      "view.default".to_string(),
      "later".to_string()
    )]);
    assert!(
      cfg.default_view().is_err()
    );
  }

  #[test]
  fn data_dir_override_is_created() {
    let temp =
      tempdir().expect("tempdir");
    let target =
      temp.path().join("nested/data");
    let dir = resolve_data_dir(
      &Config::default(),
      Some(&target)
    )
    .expect("resolve");
    assert_eq!(dir, target);
    assert!(target.is_dir());
  }
}
