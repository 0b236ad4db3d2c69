//! Extraction of the generated scripts from a model response.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::error::OneShotError;
use crate::query::FunctionSpec;

/// Function the model calls under the function-calling strategy.
pub const SUBMIT_FUNCTION: &str = "submit_scripts";

fn python_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```python\s+(.*?)```").expect("static regex is valid"))
}

fn yaml_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```(?:yaml|yml)\s+(.*?)```").expect("static regex is valid"))
}

fn name_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^name:.*$").expect("static regex is valid"))
}

/// The three files a one-shot response must contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScripts {
    pub train: String,
    pub inference: String,
    pub environment: String,
}

/// Paths the scripts were saved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedScripts {
    pub train: PathBuf,
    pub inference: PathBuf,
    pub environment: PathBuf,
}

/// Pulls exactly two python blocks and one yaml block out of `response`.
pub fn extract_scripts(response: &str) -> Result<GeneratedScripts, OneShotError> {
    let python: Vec<&str> = python_block()
        .captures_iter(response)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if python.len() != 2 {
        return Err(OneShotError::Extract(format!(
            "expected 2 python code blocks, found {}",
            python.len()
        )));
    }

    let yaml: Vec<&str> = yaml_block()
        .captures_iter(response)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if yaml.len() != 1 {
        return Err(OneShotError::Extract(format!(
            "expected 1 yaml code block, found {}",
            yaml.len()
        )));
    }

    Ok(GeneratedScripts {
        train: python[0].to_string(),
        inference: python[1].to_string(),
        environment: yaml[0].to_string(),
    })
}

/// Declares [`SUBMIT_FUNCTION`] with one string argument per file.
pub fn submit_scripts_function() -> FunctionSpec {
    FunctionSpec {
        name: SUBMIT_FUNCTION.to_string(),
        description: "Submit the training script, inference script and conda environment".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "train_py": { "type": "string", "description": "Contents of train.py" },
                "inference_py": { "type": "string", "description": "Contents of inference.py" },
                "environment_yaml": { "type": "string", "description": "Contents of environment.yaml" }
            },
            "required": ["train_py", "inference_py", "environment_yaml"]
        }),
    }
}

/// Reads the three files from the arguments of a [`SUBMIT_FUNCTION`] call.
pub fn scripts_from_arguments(name: &str, arguments: &Value) -> Result<GeneratedScripts, OneShotError> {
    if name != SUBMIT_FUNCTION {
        return Err(OneShotError::Extract(format!(
            "model called '{}' instead of '{}'",
            name, SUBMIT_FUNCTION
        )));
    }
    let field = |key: &str| {
        arguments[key]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| OneShotError::Extract(format!("missing '{}' argument", key)))
    };
    Ok(GeneratedScripts {
        train: field("train_py")?,
        inference: field("inference_py")?,
        environment: field("environment_yaml")?,
    })
}

/// Forces the conda environment's `name:` line to `env_name`.
pub fn ensure_env_name(yaml: &str, env_name: &str) -> String {
    let wanted = format!("name: {}", env_name);
    if yaml.lines().any(|line| line.trim_end() == wanted) {
        return yaml.to_string();
    }
    if name_line().is_match(yaml) {
        return name_line().replace_all(yaml, wanted.as_str()).into_owned();
    }
    format!("{}\n{}", wanted, yaml)
}

/// Writes `train.py`, `inference.py` and `environment.yaml` into `dir`.
pub fn save_scripts(
    scripts: &GeneratedScripts,
    dir: &Path,
    env_name: &str,
) -> Result<SavedScripts, OneShotError> {
    fs::create_dir_all(dir)?;
    let saved = SavedScripts {
        train: dir.join("train.py"),
        inference: dir.join("inference.py"),
        environment: dir.join("environment.yaml"),
    };
    fs::write(&saved.train, &scripts.train)?;
    fs::write(&saved.inference, &scripts.inference)?;
    fs::write(&saved.environment, ensure_env_name(&scripts.environment, env_name))?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RESPONSE: &str = "Here you go.\n\n# train.py\n```python\nprint('train')\n```\n\n# inference.py\n```python\nprint('infer')\n```\n\n# environment.yaml\n```yaml\nname: ml\ndependencies:\n  - python=3.11\n```\n";

    #[test]
    fn test_extract_scripts() {
        let scripts = extract_scripts(RESPONSE).unwrap();
        assert_eq!(scripts.train, "print('train')\n");
        assert_eq!(scripts.inference, "print('infer')\n");
        assert!(scripts.environment.starts_with("name: ml\n"));
    }

    #[test]
    fn test_extract_rejects_wrong_block_counts() {
        let one_python = "```python\nx = 1\n```\n```yaml\nname: a\n```";
        assert!(matches!(extract_scripts(one_python), Err(OneShotError::Extract(ref m)) if m.contains("python")));

        let no_yaml = "```python\na\n```\n```python\nb\n```";
        assert!(matches!(extract_scripts(no_yaml), Err(OneShotError::Extract(ref m)) if m.contains("yaml")));

        let yml = "```python\na\n```\n```python\nb\n```\n```yml\nname: x\n```";
        assert!(extract_scripts(yml).is_ok());
    }

    #[test]
    fn test_scripts_from_arguments() {
        let args = json!({
            "train_py": "print('train')",
            "inference_py": "print('infer')",
            "environment_yaml": "name: ml\n"
        });
        let scripts = scripts_from_arguments(SUBMIT_FUNCTION, &args).unwrap();
        assert_eq!(scripts.inference, "print('infer')");

        let partial = json!({ "train_py": "x" });
        assert!(matches!(
            scripts_from_arguments(SUBMIT_FUNCTION, &partial),
            Err(OneShotError::Extract(ref m)) if m.contains("inference_py")
        ));
        assert!(scripts_from_arguments("other", &args).is_err());
    }

    #[test]
    fn test_ensure_env_name() {
        assert_eq!(ensure_env_name("name: oneshot_env\n", "oneshot_env"), "name: oneshot_env\n");
        assert_eq!(
            ensure_env_name("name: ml\ndependencies: []\n", "oneshot_env"),
            "name: oneshot_env\ndependencies: []\n"
        );
        assert_eq!(
            ensure_env_name("dependencies: []\n", "oneshot_env"),
            "name: oneshot_env\ndependencies: []\n"
        );
    }

    #[test]
    fn test_save_scripts() {
        let temp = TempDir::new().unwrap();
        let scripts = extract_scripts(RESPONSE).unwrap();

        let saved = save_scripts(&scripts, temp.path(), "oneshot_env").unwrap();

        assert_eq!(fs::read_to_string(&saved.train).unwrap(), "print('train')\n");
        assert!(fs::read_to_string(&saved.environment)
            .unwrap()
            .starts_with("name: oneshot_env\n"));
    }
}
