//! run_transform - run a transform script against a dataset document

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use transform_kernel::config::TransformConfig;
use transform_kernel::marshal::from_json;
use transform_kernel::{
    freeze, DatasetDocument, DynamicValue, FilesystemDatasetLoader, Mapping, RhaiEvaluator,
    Script, Transformer,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the transform script.
    script: PathBuf,
    /// Dataset document the script starts from (JSON). Starts empty if omitted.
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// JSON object exposed to the script through `config::get_config`.
    #[arg(long, value_name = "PATH")]
    config_values: Option<PathBuf>,
    /// JSON object exposed to the script through `config::get_secret`.
    #[arg(long, value_name = "PATH", env = "TRANSFORM_SECRETS_PATH")]
    secrets: Option<PathBuf>,
    /// Directory of `<reference>.json` documents readable through `datasets`.
    #[arg(long, env = "TRANSFORM_DATASETS_DIR")]
    datasets_dir: Option<PathBuf>,
    /// Comma-separated dataset fields the script may not change (e.g. meta.title,structure).
    #[arg(long, value_delimiter = ',')]
    frozen: Vec<String>,
    /// Output path for the resulting dataset document. Writes to stdout if omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = TransformConfig::load()?;

    let script = Script::from_file(&args.script)?;
    let dataset = match &args.dataset {
        Some(path) => {
            let raw = read_file(path)?;
            let document: DatasetDocument = serde_json::from_str(&raw)
                .map_err(|e| anyhow!("invalid dataset document {}: {}", path.display(), e))?;
            document.into_dataset()?
        }
        None => Default::default(),
    };

    let mut transformer = Transformer::from_config(&config).with_output(Arc::new(Mutex::new(
        std::io::stderr(),
    )));
    if let Some(path) = &args.config_values {
        transformer = transformer.with_config(read_mapping(path)?);
    }
    if let Some(path) = &args.secrets {
        transformer = transformer.with_secrets(read_mapping(path)?);
    }
    if let Some(dir) = &args.datasets_dir {
        transformer = transformer.with_loader(Arc::new(FilesystemDatasetLoader::new(dir)));
    }
    let frozen: Vec<String> = args
        .frozen
        .iter()
        .map(|field| field.trim().to_string())
        .filter(|field| !field.is_empty())
        .collect();
    if !frozen.is_empty() {
        log::info!("frozen fields: {}", frozen.join(", "));
        transformer = transformer.with_mutation_check_arc(freeze(frozen));
    }

    let cancel = transformer.cancel_token();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, cancelling after the current phase");
        cancel.cancel();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let output = transformer.run(&RhaiEvaluator::new(), &script, dataset)?;
    if let Some(result) = &output.result {
        log::info!(
            "{} returned {} ({} entries)",
            result.phase,
            result.value.type_name(),
            result.entries.len()
        );
    }

    let document = DatasetDocument::from_dataset(output.dataset)?;
    let json = serde_json::to_string_pretty(&document)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;
            log::info!("dataset written to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))
}

fn read_mapping(path: &Path) -> Result<Mapping> {
    let raw = read_file(path)?;
    let json: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid JSON in {}: {}", path.display(), e))?;
    match from_json(&json)? {
        DynamicValue::Mapping(mapping) => Ok(mapping),
        other => Err(anyhow!(
            "{} must contain a JSON object, found {}",
            path.display(),
            other.type_name()
        )),
    }
}
