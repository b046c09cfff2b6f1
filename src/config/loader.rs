//! YAML loading with `{{ name }}` placeholders.
//!
//! Placeholders are rendered before the YAML is parsed. Without caller variables the file is
//! rendered twice: first with every placeholder empty, then with the values parsed in the first
//! pass, so a config can refer to its own keys (`path: "{{ data_dir }}/*.parquet"`).

use crate::config::error::ConfigError;
use crate::config::types::PipelineConfig;
use log::debug;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::path::Path;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
            .expect("placeholder pattern is a valid regex")
    })
}

/// Looks up a dotted path such as `modis.search.bbox`. Numeric segments index sequences.
fn lookup<'a>(vars: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(vars, |value, key| match value {
        Value::Mapping(map) => map.get(key),
        Value::Sequence(seq) => key.parse::<usize>().ok().and_then(|i| seq.get(i)),
        _ => None,
    })
}

/// Text substituted for a value. Sequences and mappings become JSON, which is valid flow YAML.
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Tagged(tagged) => render_value(&tagged.value),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Replaces every placeholder in `text`. Unknown names render empty.
pub fn render_template(text: &str, vars: &Value) -> String {
    placeholder()
        .replace_all(text, |caps: &Captures<'_>| {
            lookup(vars, &caps[1]).map(render_value).unwrap_or_default()
        })
        .into_owned()
}

fn parse(text: &str, origin: &str) -> Result<Value, ConfigError> {
    serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(origin.to_string(), e))
}

/// Renders and parses `text`. See the module docs for the two-pass behaviour when `vars` is
/// `None`.
pub fn load_yaml_str(text: &str, vars: Option<&Value>) -> Result<Value, ConfigError> {
    if let Some(vars) = vars {
        if !matches!(vars, Value::Mapping(_)) {
            return Err(ConfigError::VariablesNotMapping);
        }
        return parse(&render_template(text, vars), "rendered with caller variables");
    }

    let first = parse(
        &render_template(text, &Value::Mapping(Mapping::new())),
        "first pass",
    )?;
    debug!("Rendering config a second time with its own values");
    parse(&render_template(text, &first), "second pass")
}

pub fn load_yaml_config(path: &Path, vars: Option<&Value>) -> Result<Value, ConfigError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    load_yaml_str(&text, vars)
}

/// Renders the file and deserialises it into `T`.
pub fn load_typed_config<T: DeserializeOwned>(
    path: &Path,
    vars: Option<&Value>,
) -> Result<T, ConfigError> {
    let value = load_yaml_config(path, vars)?;
    serde_yaml::from_value(value).map_err(|e| ConfigError::Parse(path.display().to_string(), e))
}

pub fn load_pipeline_config(
    path: &Path,
    vars: Option<&Value>,
) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = load_typed_config(path, vars)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dotted_paths_and_collections() {
        let vars: Value = serde_yaml::from_str(
            "region:\n  bbox: [16.0, -35.0, 33.0, -22.0]\n  name: south_africa\nyear: 2023\n",
        )
        .unwrap();
        let rendered = render_template(
            "bbox: {{ region.bbox }}\nname: {{region.name}}\nfirst: {{ region.bbox.0 }}\nmissing: '{{ nope }}'",
            &vars,
        );
        assert_eq!(
            rendered,
            "bbox: [16.0,-35.0,33.0,-22.0]\nname: south_africa\nfirst: 16.0\nmissing: ''"
        );
    }

    #[test]
    fn second_pass_uses_own_values() {
        let text = "data_dir: /data/ghcnh\nstations:\n  path: \"{{ data_dir }}/*.parquet\"\n";
        let config = load_yaml_str(text, None).unwrap();
        assert_eq!(config["stations"]["path"], "/data/ghcnh/*.parquet");
    }

    #[test]
    fn caller_variables_take_over() {
        let text = "data_dir: /data/ghcnh\npath: \"{{ data_dir }}/x.parquet\"\n";
        let vars: Value = serde_yaml::from_str("data_dir: /tmp").unwrap();
        let config = load_yaml_str(text, Some(&vars)).unwrap();
        assert_eq!(config["path"], "/tmp/x.parquet");

        let not_a_map = Value::Sequence(vec![]);
        assert!(matches!(
            load_yaml_str(text, Some(&not_a_map)),
            Err(ConfigError::VariablesNotMapping)
        ));
    }

    #[test]
    fn lambdas_stay_strings() {
        let config = load_yaml_str("transform: 'lambda x: x * 2'\n", None).unwrap();
        assert_eq!(config["transform"], "lambda x: x * 2");
    }

    #[test]
    fn example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/example.yaml");
        let config = load_pipeline_config(&path, None).unwrap();
        assert_eq!(config.stations.path, "data/ghcnh/*.parquet");
        assert_eq!(
            config.download.combined_output.as_deref(),
            Some(Path::new("data/ghcnh/ghcnh_south_africa.parquet"))
        );
        assert!(config.matchup.quality_mask);
    }

    #[test]
    fn reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "a: [1, 2\n").unwrap();
        assert!(matches!(
            load_yaml_config(&path, None),
            Err(ConfigError::Parse(..))
        ));
        assert!(matches!(
            load_yaml_config(&dir.path().join("missing.yaml"), None),
            Err(ConfigError::Read(..))
        ));
    }
}
