//! TOML pipeline configuration and profile resolution.
//!
//! A configuration file declares settings, named profiles, and the ordered
//! stage list:
//!
//! ```toml
//! [settings]
//! tail_lines = 20
//!
//! [profiles.prod]
//! data_dir = "data/prod"
//! model_dir = "models/prod"
//! label = "direction"
//! variants = ["1h", "4h"]
//!
//! [[stages]]
//! id = "features"
//! command = ["python", "-m", "pipeline.features", "{data_dir}"]
//! inputs = ["{data_dir}/data.csv"]
//! outputs = [{ path = "{data_dir}/features.csv", columns = ["vol_regime"] }]
//! ```
//!
//! Resolving a profile expands every template once and yields an immutable
//! [`RunContext`] plus a validated [`Pipeline`]. Nothing downstream reads the
//! process working directory or environment.

use serde::{Deserialize, Serialize};
use smartrun_core::{
    ArtifactSpec, ColumnSchema, CommandSpec, MetricSpec, Pipeline, PipelineError, Stage, StageId,
    StageSelection,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown profile '{name}'. Available: {}", .available.join(", "))]
    UnknownProfile {
        name: String,
        available: Vec<String>,
    },

    #[error("unknown placeholder '{{{placeholder}}}' in '{template}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("unterminated placeholder in '{0}'")]
    UnterminatedPlaceholder(String),

    #[error("'{{variant}}' is only allowed in artifact paths (stage '{0}')")]
    VariantInCommand(StageId),

    #[error("'{template}' uses '{{variant}}' but profile '{profile}' declares no variants")]
    NoVariants { template: String, profile: String },

    #[error("stage '{0}' has an empty command")]
    EmptyCommand(StageId),

    #[error("invalid delimiter '{0}': must be a single ASCII character")]
    InvalidDelimiter(String),

    #[error("invalid threshold {threshold} for stage '{stage}': must be within [0, 1]")]
    InvalidThreshold { stage: StageId, threshold: f64 },

    #[error("stage(s) {} not defined in this pipeline. Defined: {}", stage_names(.stages), stage_names(.defined))]
    UndefinedStages {
        stages: Vec<StageId>,
        defined: Vec<StageId>,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

fn stage_names(ids: &[StageId]) -> String {
    let names: Vec<&str> = ids.iter().map(|id| id.name()).collect();
    names.join(", ")
}

/// Whole configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub settings: Settings,
    pub profiles: BTreeMap<String, ProfileConfig>,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Lines of stdout/stderr kept per executed stage.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    /// Stages run by `--quick`. Defaults to merge through signals.
    #[serde(default)]
    pub quick_stages: Option<Vec<StageId>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tail_lines: default_tail_lines(),
            quick_stages: None,
        }
    }
}

fn default_tail_lines() -> usize {
    20
}

impl Settings {
    pub fn quick_selection(&self) -> StageSelection {
        match &self.quick_stages {
            Some(ids) => StageSelection::only(ids.iter().copied()),
            None => StageSelection::range(StageId::Merge, StageId::Signals),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    /// Working directory for commands and relative paths. Relative values
    /// are taken from the config file's directory.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageConfig {
    pub id: StageId,
    pub command: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<ArtifactConfig>,
    #[serde(default)]
    pub outputs: Vec<ArtifactConfig>,
    #[serde(default)]
    pub metrics: Option<MetricConfig>,
}

/// An artifact is either a bare path or a table with a column manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ArtifactConfig {
    Path(String),
    Detailed {
        path: String,
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        delimiter: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricConfig {
    SignalBalance {
        #[serde(default = "default_signal_column")]
        column: String,
        #[serde(default = "default_buy")]
        buy: String,
        #[serde(default = "default_sell")]
        sell: String,
        #[serde(default = "default_imbalance_threshold")]
        threshold: f64,
    },
}

fn default_signal_column() -> String {
    "signal".into()
}

fn default_buy() -> String {
    "1".into()
}

fn default_sell() -> String {
    "-1".into()
}

/// Imbalance above which the signals stage is flagged.
pub fn default_imbalance_threshold() -> f64 {
    0.30
}

/// Immutable run-wide context handed to every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub profile: String,
    pub workdir: PathBuf,
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    pub tail_lines: usize,
}

impl PipelineConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Expand templates for `profile` and build the pipeline.
    ///
    /// `base_dir` anchors a relative or missing profile `workdir`; it is
    /// normally the directory holding the config file.
    pub fn resolve(
        &self,
        profile: &str,
        base_dir: &Path,
    ) -> Result<(RunContext, Pipeline), ConfigError> {
        let prof = self
            .profiles
            .get(profile)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: profile.to_string(),
                available: self.profile_names(),
            })?;

        let workdir = match &prof.workdir {
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };

        let vars = Vars::new(profile, prof, &workdir);
        let ctx = RunContext {
            profile: profile.to_string(),
            data_dir: workdir.join(&prof.data_dir),
            model_dir: workdir.join(&prof.model_dir),
            workdir: workdir.clone(),
            tail_lines: self.settings.tail_lines,
        };

        let stages = self
            .stages
            .iter()
            .map(|sc| resolve_stage(sc, &vars, prof, profile, &workdir))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((ctx, Pipeline::new(stages)?))
    }
}

fn resolve_stage(
    sc: &StageConfig,
    vars: &Vars,
    prof: &ProfileConfig,
    profile: &str,
    workdir: &Path,
) -> Result<Stage, ConfigError> {
    let (program, args) = sc
        .command
        .split_first()
        .ok_or(ConfigError::EmptyCommand(sc.id))?;

    let mut command = CommandSpec::new(expand_command(program, vars, sc.id)?);
    for arg in args {
        command = command.arg(expand_command(arg, vars, sc.id)?);
    }

    let mut stage = Stage::new(sc.id, command);
    for decl in &sc.inputs {
        for spec in resolve_artifact(decl, vars, prof, profile, workdir)? {
            stage = stage.input(spec);
        }
    }
    for decl in &sc.outputs {
        for spec in resolve_artifact(decl, vars, prof, profile, workdir)? {
            stage = stage.output(spec);
        }
    }

    if let Some(MetricConfig::SignalBalance {
        column,
        buy,
        sell,
        threshold,
    }) = &sc.metrics
    {
        if !(0.0..=1.0).contains(threshold) {
            return Err(ConfigError::InvalidThreshold {
                stage: sc.id,
                threshold: *threshold,
            });
        }
        stage = stage.with_metrics(MetricSpec::SignalBalance {
            column: column.clone(),
            buy: buy.clone(),
            sell: sell.clone(),
            threshold: *threshold,
        });
    }

    Ok(stage)
}

fn expand_command(template: &str, vars: &Vars, stage: StageId) -> Result<String, ConfigError> {
    if template.contains("{variant}") {
        return Err(ConfigError::VariantInCommand(stage));
    }
    expand(template, &vars.map)
}

fn resolve_artifact(
    decl: &ArtifactConfig,
    vars: &Vars,
    prof: &ProfileConfig,
    profile: &str,
    workdir: &Path,
) -> Result<Vec<ArtifactSpec>, ConfigError> {
    let (template, columns, delimiter) = match decl {
        ArtifactConfig::Path(path) => (path.as_str(), &[][..], None),
        ArtifactConfig::Detailed {
            path,
            columns,
            delimiter,
        } => (path.as_str(), columns.as_slice(), delimiter.as_deref()),
    };

    let delimiter = delimiter.map(parse_delimiter).transpose()?.unwrap_or(b',');
    let schema = if columns.is_empty() {
        None
    } else {
        Some(ColumnSchema::new(columns.iter().cloned()).with_delimiter(delimiter))
    };

    let paths = if template.contains("{variant}") {
        if prof.variants.is_empty() {
            return Err(ConfigError::NoVariants {
                template: template.to_string(),
                profile: profile.to_string(),
            });
        }
        prof.variants
            .iter()
            .map(|variant| {
                let mut map = vars.map.clone();
                map.insert("variant", variant.clone());
                expand(template, &map)
            })
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![expand(template, &vars.map)?]
    };

    Ok(paths
        .into_iter()
        .map(|p| {
            let spec = ArtifactSpec::new(workdir.join(p)).with_delimiter(delimiter);
            match &schema {
                Some(schema) => spec.with_freshness(schema.clone()),
                None => spec,
            }
        })
        .collect())
}

fn parse_delimiter(s: &str) -> Result<u8, ConfigError> {
    let unescaped = if s == "\\t" { "\t" } else { s };
    match unescaped.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => Err(ConfigError::InvalidDelimiter(s.to_string())),
    }
}

/// Placeholder values available to templates.
struct Vars {
    map: BTreeMap<&'static str, String>,
}

impl Vars {
    fn new(profile: &str, prof: &ProfileConfig, workdir: &Path) -> Self {
        let mut map = BTreeMap::new();
        map.insert("profile", profile.to_string());
        map.insert("workdir", workdir.display().to_string());
        map.insert("data_dir", prof.data_dir.display().to_string());
        map.insert("model_dir", prof.model_dir.display().to_string());
        map.insert("label", prof.label.clone().unwrap_or_default());
        map.insert("variants", prof.variants.join(","));
        Self { map }
    }
}

/// Replace `{name}` placeholders. `{{` and `}}` are literal braces.
pub fn expand(template: &str, vars: &BTreeMap<&str, String>) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(ConfigError::UnterminatedPlaceholder(template.to_string()))
                        }
                    }
                }
                let value = vars.get(name.as_str()).ok_or_else(|| {
                    ConfigError::UnknownPlaceholder {
                        template: template.to_string(),
                        placeholder: name.clone(),
                    }
                })?;
                out.push_str(value);
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}
