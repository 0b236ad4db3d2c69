//! Built-in one-shot agent.
//!
//! Asks a model once for a training script, an inference script and a conda
//! environment, then runs them inside the agent container:
//!
//! 1. Read the task description and summarize `train.csv`
//! 2. Query the model and extract the three files
//! 3. Create the conda environment, train, then predict on `test_features.csv`
//! 4. Remove the environment on every path past its creation

pub mod scripts;

pub use scripts::{
    ensure_env_name, extract_scripts, save_scripts, scripts_from_arguments, submit_scripts_function,
    GeneratedScripts, SavedScripts, SUBMIT_FUNCTION,
};

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::OneShotError;
use crate::query::{ModelQuery, QueryOutput, QueryRequest, QueryStrategy};

/// Conda environment the generated scripts run in.
pub const ENV_NAME: &str = "oneshot_env";

const NO_DESCRIPTION: &str = "No description available";

/// Inputs of one one-shot run.
#[derive(Debug, Clone)]
pub struct OneShotArgs {
    pub data_dir: PathBuf,
    pub submission_dir: PathBuf,
    pub code_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub model: String,
    pub temperature: f64,
}

/// Column names and row count of a CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSummary {
    pub columns: Vec<String>,
    pub rows: usize,
}

/// Reads the header and counts the data records of `path`.
pub fn summarize_csv(path: &Path) -> Result<CsvSummary, OneShotError> {
    let unavailable = |reason: String| OneShotError::DatasetUnavailable {
        path: path.to_path_buf(),
        reason,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| unavailable(e.to_string()))?;

    let columns = reader
        .headers()
        .map_err(|e| unavailable(e.to_string()))?
        .iter()
        .map(|c| c.trim().to_string())
        .collect();

    let mut rows = 0;
    for record in reader.records() {
        record.map_err(|e| unavailable(e.to_string()))?;
        rows += 1;
    }
    Ok(CsvSummary { columns, rows })
}

/// Renders names the way the prompt lists them: `['smiles', 'target']`.
fn quoted_list(names: &[String]) -> String {
    let quoted: Vec<String> = names
        .iter()
        .map(|n| format!("'{}'", n.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// Builds the single prompt sent to the model.
pub fn build_prompt(train_csv: &Path, summary: &CsvSummary, description: &str, submission_dir: &Path) -> String {
    let submission = submission_dir.display();
    format!(
        r#"Create the best possible classifier that will generalize to new unseen data.
You are using a linux system.
You have access to both CPU and GPU resources (1 cuda device).

DATASET:
- Training file: {train}
- Format: CSV with columns {columns}
- Training samples: {rows}

Dataset knowledge:
{description}

REQUIREMENTS:
1. Create three files:
   - train.py
   - inference.py
   - environment.yaml

2. For train.py:
- Train a robust model suitable for the given dataset
- Save the trained model to: {submission}/model.pkl using joblib or pickle
- Save all model artifacts to {submission}/
- Split the train file to train and validation to optimize during training.

3. For inference.py:
- Accept arguments: --input and --output
- Load the model from model.pkl in the CURRENT DIRECTORY (use relative path or os.path.dirname(__file__))
- DO NOT use hardcoded absolute paths like /home/submission/model.pkl
- Output a CSV with column 'target' containing a score from 0 to 1

4. For environment.yaml:
- Create a conda environment file with all necessary packages
- Include all libraries used in both train.py and inference.py
- Pin all package versions (e.g., numpy<2, pytorch=2.1.*, scikit-learn>=1.3) to ensure compatibility

OUTPUT FORMAT (CRITICAL):
Provide EXACTLY 2 Python code blocks followed by EXACTLY 1 YAML code block in this order:

# train.py
```python
[train.py code here]
```

# inference.py
```python
[inference.py code here]
```

# environment.yaml
```yaml
[environment.yaml content here]
```

Do not include any other code blocks. Use exactly this format.
"#,
        train = train_csv.display(),
        columns = quoted_list(&summary.columns),
        rows = summary.rows,
        description = description,
        submission = submission,
    )
}

/// Runs the one-shot agent end to end.
pub async fn run(args: &OneShotArgs, model: &dyn ModelQuery) -> Result<(), OneShotError> {
    fs::create_dir_all(&args.submission_dir)?;
    fs::create_dir_all(&args.logs_dir)?;

    let description = fs::read_to_string(args.data_dir.join("description.md"))
        .unwrap_or_else(|_| NO_DESCRIPTION.to_string());
    let train_csv = args.data_dir.join("train.csv");
    let summary = summarize_csv(&train_csv)?;
    info!(
        "Training data {} has {} rows and {} columns",
        train_csv.display(),
        summary.rows,
        summary.columns.len()
    );

    let prompt = build_prompt(&train_csv, &summary, &description, &args.submission_dir);
    let mut request = QueryRequest::new(&args.model)
        .with_user(prompt)
        .with_temperature(args.temperature);
    if model.strategy() == QueryStrategy::FunctionCalling {
        request = request.with_function(submit_scripts_function());
    }

    info!("Querying {} ({})", args.model, model.strategy());
    let response = model.query(request).await?;
    let (raw, scripts) = match response.output {
        QueryOutput::Text(text) => {
            let scripts = extract_scripts(&text);
            (text, scripts)
        }
        QueryOutput::FunctionCall { name, arguments } => {
            let scripts = scripts_from_arguments(&name, &arguments);
            let raw = serde_json::to_string_pretty(&arguments).unwrap_or_else(|_| arguments.to_string());
            (raw, scripts)
        }
    };

    if let Err(e) = fs::write(args.logs_dir.join("oneshot_response.md"), &raw) {
        warn!("Failed to save model response: {}", e);
    }

    let scripts = scripts?;
    // Submission dir is the workspace so every file ends up with the submission.
    let saved = save_scripts(&scripts, &args.submission_dir, ENV_NAME)?;
    copy_to_code_dir(&saved, &args.code_dir);

    run_shell(
        "create environment",
        &format!("conda env create -f {}", shell_quote(&saved.environment)),
        &args.logs_dir,
    )
    .await?;

    let outcome = train_and_predict(args, &saved).await;

    if let Err(e) = run_shell("remove environment", &format!("conda env remove -n {} -y", ENV_NAME), &args.logs_dir).await {
        warn!("Failed to remove conda environment {}: {}", ENV_NAME, e);
    }

    outcome?;
    info!("One-shot agent finished; submission at {}", args.submission_dir.join("submission.csv").display());
    Ok(())
}

async fn train_and_predict(args: &OneShotArgs, saved: &SavedScripts) -> Result<(), OneShotError> {
    run_shell(
        "train",
        &format!("source activate {} && python {}", ENV_NAME, shell_quote(&saved.train)),
        &args.logs_dir,
    )
    .await?;

    run_shell(
        "inference",
        &format!(
            "source activate {} && python {} --input {} --output {}",
            ENV_NAME,
            shell_quote(&saved.inference),
            shell_quote(&args.data_dir.join("test_features.csv")),
            shell_quote(&args.submission_dir.join("submission.csv")),
        ),
        &args.logs_dir,
    )
    .await
}

fn copy_to_code_dir(saved: &SavedScripts, code_dir: &Path) {
    if let Err(e) = fs::create_dir_all(code_dir) {
        warn!("Cannot create {}: {}", code_dir.display(), e);
        return;
    }
    for path in [&saved.train, &saved.inference, &saved.environment] {
        if let Some(name) = path.file_name() {
            if let Err(e) = fs::copy(path, code_dir.join(name)) {
                warn!("Failed to copy {} to code dir: {}", path.display(), e);
            }
        }
    }
}

/// Runs `script` with `bash -c`, appending its output to `<logs_dir>/oneshot.log`.
async fn run_shell(step: &str, script: &str, logs_dir: &Path) -> Result<(), OneShotError> {
    info!("Running step '{}': {}", step, script);
    let output = Command::new("bash")
        .arg("-c")
        .arg(script)
        .stdin(Stdio::null())
        .output()
        .await?;

    let mut log = format!("$ {}\n", script);
    log.push_str(&String::from_utf8_lossy(&output.stdout));
    log.push_str(&String::from_utf8_lossy(&output.stderr));
    append_log(&logs_dir.join("oneshot.log"), &log);

    if output.status.success() {
        debug!("Step '{}' succeeded", step);
        Ok(())
    } else {
        error!("Step '{}' failed with {}", step, output.status);
        Err(OneShotError::StepFailed {
            step: step.to_string(),
            code: output.status.code(),
        })
    }
}

fn append_log(path: &Path, text: &str) {
    use std::io::Write;

    let result = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(text.as_bytes()));
    if let Err(e) = result {
        warn!("Failed to append to {}: {}", path.display(), e);
    }
}

fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::query::QueryResponse;
    use serde_json::json;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct CannedModel {
        strategy: QueryStrategy,
        reply: QueryOutput,
        prompts: Mutex<Vec<String>>,
        functions: Mutex<Vec<Option<String>>>,
    }

    impl CannedModel {
        fn new(strategy: QueryStrategy, reply: QueryOutput) -> Self {
            Self {
                strategy,
                reply,
                prompts: Mutex::new(Vec::new()),
                functions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelQuery for CannedModel {
        fn strategy(&self) -> QueryStrategy {
            self.strategy
        }

        async fn query(&self, request: QueryRequest) -> Result<QueryResponse, QueryError> {
            self.prompts
                .lock()
                .unwrap()
                .push(request.user_message.clone().unwrap_or_default());
            self.functions
                .lock()
                .unwrap()
                .push(request.function.as_ref().map(|f| f.name.clone()));
            Ok(QueryResponse {
                output: self.reply.clone(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
    }

    fn args(temp: &TempDir) -> OneShotArgs {
        let data_dir = temp.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(data_dir.join("train.csv"), "smiles,target\nCCO,1\nCCC,0\n\n").unwrap();
        OneShotArgs {
            data_dir,
            submission_dir: temp.path().join("submission"),
            code_dir: temp.path().join("code"),
            logs_dir: temp.path().join("logs"),
            model: "test-model".to_string(),
            temperature: 1.0,
        }
    }

    #[test]
    fn test_summarize_csv() {
        let temp = TempDir::new().unwrap();
        let args = args(&temp);
        let summary = summarize_csv(&args.data_dir.join("train.csv")).unwrap();
        assert_eq!(summary.columns, vec!["smiles", "target"]);
        assert_eq!(summary.rows, 2);
    }

    #[test]
    fn test_summarize_csv_with_quoted_fields() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.csv");
        fs::write(&path, "\"id,name\",target\n\"a,b\",1\n\"multi\nline\",0\n").unwrap();

        let summary = summarize_csv(&path).unwrap();
        assert_eq!(summary.columns, vec!["id,name", "target"]);
        assert_eq!(summary.rows, 2);
    }

    #[test]
    fn test_summarize_missing_csv() {
        let err = summarize_csv(Path::new("/nonexistent/train.csv")).unwrap_err();
        assert!(matches!(err, OneShotError::DatasetUnavailable { .. }));
    }

    #[test]
    fn test_prompt_mentions_dataset() {
        let summary = CsvSummary {
            columns: vec!["smiles".into(), "target".into()],
            rows: 2,
        };
        let prompt = build_prompt(
            Path::new("/home/data/train.csv"),
            &summary,
            "Predict solubility.",
            Path::new("/home/submission"),
        );
        assert!(prompt.contains("Training file: /home/data/train.csv"));
        assert!(prompt.contains("columns ['smiles', 'target']"));
        assert!(prompt.contains("Training samples: 2"));
        assert!(prompt.contains("Predict solubility."));
        assert!(prompt.contains("/home/submission/model.pkl"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(Path::new("/a b/c.py")), "'/a b/c.py'");
        assert_eq!(shell_quote(Path::new("/it's")), r"'/it'\''s'");
    }

    #[tokio::test]
    async fn test_run_fails_on_malformed_response() {
        let temp = TempDir::new().unwrap();
        let args = args(&temp);
        let model = CannedModel::new(
            QueryStrategy::Plain,
            QueryOutput::Text("I cannot help with that.".to_string()),
        );

        let err = run(&args, &model).await.unwrap_err();

        assert!(matches!(err, OneShotError::Extract(_)));
        assert!(model.prompts.lock().unwrap()[0].contains(NO_DESCRIPTION));
        assert_eq!(
            fs::read_to_string(args.logs_dir.join("oneshot_response.md")).unwrap(),
            "I cannot help with that."
        );
        assert!(!args.submission_dir.join("train.py").exists());
        assert_eq!(model.functions.lock().unwrap()[0], None);
    }

    #[tokio::test]
    async fn test_function_calling_requests_submit_function() {
        let temp = TempDir::new().unwrap();
        let args = args(&temp);
        let model = CannedModel::new(
            QueryStrategy::FunctionCalling,
            QueryOutput::FunctionCall {
                name: SUBMIT_FUNCTION.to_string(),
                arguments: json!({ "train_py": "print('train')" }),
            },
        );

        let err = run(&args, &model).await.unwrap_err();

        assert!(matches!(err, OneShotError::Extract(ref m) if m.contains("inference_py")));
        assert_eq!(model.functions.lock().unwrap()[0].as_deref(), Some(SUBMIT_FUNCTION));
        assert!(fs::read_to_string(args.logs_dir.join("oneshot_response.md"))
            .unwrap()
            .contains("train_py"));
    }

    #[test]
    fn test_quoted_list() {
        assert_eq!(quoted_list(&["smiles".to_string(), "target".to_string()]), "['smiles', 'target']");
        assert_eq!(quoted_list(&[]), "[]");
    }
}
