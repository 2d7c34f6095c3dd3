//! The `datasets` namespace: read access to other datasets.
//!
//! Every dataset a script loads is recorded in the output dataset's
//! `transform.resources`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dataset::{Dataset, DatasetDocument};
use crate::error::{Error, Result};
use crate::host::dataset::DatasetGateway;
use crate::host::{Args, Namespace};
use crate::marshal;
use crate::value::DynamicValue;

pub trait DatasetLoader: Send + Sync {
    fn list(&self) -> Result<Vec<String>>;

    fn load(&self, reference: &str) -> Result<Dataset>;

    /// Where `reference` resolved to, as recorded in transform resources.
    fn resource_path(&self, reference: &str) -> String {
        reference.to_string()
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDatasetLoader {
    datasets: BTreeMap<String, Dataset>,
}

impl InMemoryDatasetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: &str, dataset: Dataset) -> Self {
        self.datasets.insert(reference.to_string(), dataset);
        self
    }
}

impl DatasetLoader for InMemoryDatasetLoader {
    fn list(&self) -> Result<Vec<String>> {
        Ok(self.datasets.keys().cloned().collect())
    }

    fn load(&self, reference: &str) -> Result<Dataset> {
        self.datasets
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::DatasetLoad(format!("unknown dataset {reference}")))
    }
}

/// Loads `<root>/<reference>.json` dataset documents.
#[derive(Clone, Debug)]
pub struct FilesystemDatasetLoader {
    root: PathBuf,
}

impl FilesystemDatasetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, reference: &str) -> Result<PathBuf> {
        let valid = !reference.is_empty()
            && !reference.contains("..")
            && !reference.contains(['/', '\\']);
        if !valid {
            return Err(Error::DatasetLoad(format!("invalid dataset reference {reference:?}")));
        }
        Ok(self.root.join(format!("{reference}.json")))
    }
}

impl DatasetLoader for FilesystemDatasetLoader {
    fn list(&self) -> Result<Vec<String>> {
        let mut refs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                refs.push(stem.to_string());
            }
        }
        refs.sort();
        Ok(refs)
    }

    fn load(&self, reference: &str) -> Result<Dataset> {
        let path = self.path_for(reference)?;
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::DatasetLoad(format!("read {}: {e}", path.display())))?;
        let doc: DatasetDocument = serde_json::from_str(&raw)
            .map_err(|e| Error::DatasetLoad(format!("parse {}: {e}", path.display())))?;
        doc.into_dataset()
    }

    fn resource_path(&self, reference: &str) -> String {
        self.root
            .join(format!("{reference}.json"))
            .display()
            .to_string()
    }
}

pub fn namespace(loader: Arc<dyn DatasetLoader>, gateway: &DatasetGateway) -> Namespace {
    let list = loader.clone();
    let head = Loads {
        loader: loader.clone(),
        gateway: gateway.clone(),
    };
    let body = Loads {
        loader,
        gateway: gateway.clone(),
    };
    Namespace::new("datasets")
        .with("list_datasets", move |args| {
            Args::new("list_datasets", args, 0)?;
            Ok(DynamicValue::Sequence(
                list.list()?.into_iter().map(DynamicValue::String).collect(),
            ))
        })
        .with("load_dataset_head", move |args| {
            let args = Args::new("load_dataset_head", args, 1)?;
            let dataset = head.load(args.string(0, "ref")?)?;
            marshal::from_json(&serde_json::to_value(&dataset)?)
        })
        .with("load_dataset_body", move |args| {
            let args = Args::new("load_dataset_body", args, 1)?;
            let reference = args.string(0, "ref")?;
            let dataset = body.load(reference)?;
            match (&dataset.structure, &dataset.body) {
                (Some(structure), Some(body)) => marshal::decode_body(structure, body),
                _ => Err(Error::DatasetLoad(format!("dataset {reference} has no body"))),
            }
        })
}

struct Loads {
    loader: Arc<dyn DatasetLoader>,
    gateway: DatasetGateway,
}

impl Loads {
    fn load(&self, reference: &str) -> Result<Dataset> {
        let dataset = self.loader.load(reference)?;
        log::debug!("loaded dataset {reference}");
        let path = self.loader.resource_path(reference);
        self.gateway.with_dataset(|ds| {
            ds.transform
                .get_or_insert_with(Default::default)
                .resources
                .insert(reference.to_string(), path);
        });
        Ok(dataset)
    }
}
