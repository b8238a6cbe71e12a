//! Append-only document database keyed by generated ids.

use crate::store::StoreError;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ID_FIELD: &str = "id";
const INDEX_FILE: &str = "index.csv";
const DATA_DIR: &str = "db";

/// A directory of JSON documents with a CSV index.
///
/// The index holds the configured fields of every document followed by its
/// id. Field values are taken from the top level of the serialized document.
#[derive(Debug)]
pub struct Database {
    root: PathBuf,
    fields: Vec<String>,
    rows: Vec<IndexRow>,
}

#[derive(Debug, Clone)]
struct IndexRow {
    values: Vec<String>,
    id: Uuid,
}

impl Database {
    /// Creates an empty database at `path` indexing `fields`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::ReservedField`] if `fields` contains `id`.
    /// * [`StoreError::AlreadyExists`] if a database exists and `overwrite` is false.
    pub fn create<P: AsRef<Path>>(
        path: P,
        fields: &[&str],
        overwrite: bool,
    ) -> Result<Self, StoreError> {
        if fields.contains(&ID_FIELD) {
            return Err(StoreError::ReservedField(ID_FIELD.to_string()));
        }
        let root = path.as_ref().to_path_buf();
        if root.join(INDEX_FILE).is_file() {
            if !overwrite {
                return Err(StoreError::AlreadyExists(root.display().to_string()));
            }
            info!("Overwriting database at {}", root.display());
            let data = root.join(DATA_DIR);
            if data.is_dir() {
                fs::remove_dir_all(data)?;
            }
            fs::remove_file(root.join(INDEX_FILE))?;
        }
        fs::create_dir_all(root.join(DATA_DIR))?;
        let db = Database {
            root,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            rows: Vec::new(),
        };
        db.write_index()?;
        Ok(db)
    }

    /// Opens an existing database and loads its index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        let mut reader = csv::Reader::from_path(root.join(INDEX_FILE))?;
        let headers = reader.headers()?.clone();
        let id_column = headers
            .iter()
            .position(|h| h == ID_FIELD)
            .ok_or_else(|| StoreError::InvalidIndex("missing id column".to_string()))?;
        let fields: Vec<String> = headers
            .iter()
            .filter(|h| *h != ID_FIELD)
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let id = record
                .get(id_column)
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| StoreError::InvalidIndex(format!("bad id in row {record:?}")))?;
            let values = record
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != id_column)
                .map(|(_, v)| v.to_string())
                .collect();
            rows.push(IndexRow { values, id });
        }
        fs::create_dir_all(root.join(DATA_DIR))?;
        debug!("Opened database {} with {} documents", root.display(), rows.len());
        Ok(Database { root, fields, rows })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> Vec<Uuid> {
        self.rows.iter().map(|r| r.id).collect()
    }

    /// Index values of `field` in insertion order.
    pub fn column(&self, field: &str) -> Option<Vec<&str>> {
        let column = self.fields.iter().position(|f| f == field)?;
        Some(self.rows.iter().map(|r| r.values[column].as_str()).collect())
    }

    /// Stores `document` under a fresh id and adds it to the index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingField`] if the serialized document lacks an
    /// indexed field; nothing is written in that case.
    pub fn append<T: Serialize>(&mut self, document: &T) -> Result<Uuid, StoreError> {
        let value = serde_json::to_value(document)?;
        let values = self
            .fields
            .iter()
            .map(|field| {
                value
                    .get(field)
                    .map(index_value)
                    .ok_or_else(|| StoreError::MissingField(field.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = Uuid::new_v4();
        fs::write(self.document_path(&id), serde_json::to_string_pretty(&value)?)?;
        self.rows.push(IndexRow { values, id });
        self.write_index()?;
        debug!("Appended document {id}");
        Ok(id)
    }

    /// Loads the document stored under `id`.
    pub fn get_document<T: DeserializeOwned>(&self, id: &Uuid) -> Result<T, StoreError> {
        let path = self.document_path(id);
        if !path.is_file() {
            return Err(StoreError::UnknownId(id.to_string()));
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn document_path(&self, id: &Uuid) -> PathBuf {
        self.root.join(DATA_DIR).join(format!("{id}.json"))
    }

    fn write_index(&self) -> Result<(), StoreError> {
        let mut writer = csv::Writer::from_path(self.root.join(INDEX_FILE))?;
        writer.write_record(self.fields.iter().map(String::as_str).chain([ID_FIELD]))?;
        for row in &self.rows {
            let id = row.id.to_string();
            writer.write_record(row.values.iter().map(String::as_str).chain([id.as_str()]))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Index cell for a JSON value; strings are stored without quotes.
fn index_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
