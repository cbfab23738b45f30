use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{error::ServiceError, request::Request};

pub type CacheKey = String;

/// A response together with how long it took to compute and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timed<T> {
    pub response: T,
    /// Wall-clock seconds spent computing `response`.
    pub request_time: f64,
    /// Unix timestamp (seconds) at which the computation started.
    pub request_datetime: u64,
}

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, ServiceError>;

    /// Stores `value` unless `key` already has an entry. Entries are write-once.
    fn put(&self, key: &str, value: Value) -> Result<(), ServiceError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, Value>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, ServiceError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), ServiceError> {
        self.entries.write().entry(key.to_string()).or_insert(value);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct JsonLine {
    key: CacheKey,
    value: Value,
}

/// Append-only JSON-lines file, fully indexed in memory on open.
pub struct JsonLinesStore {
    path: PathBuf,
    entries: RwLock<HashMap<CacheKey, Value>>,
    writer: Mutex<File>,
}

impl JsonLinesStore {
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut entries = HashMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonLine>(&line) {
                    Ok(JsonLine { key, value }) => {
                        entries.entry(key).or_insert(value);
                    }
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            %err,
                            "skipping malformed cache line"
                        );
                    }
                }
            }
        }
        info!(path = %path.display(), entries = entries.len(), "opened response cache");

        let writer = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for JsonLinesStore {
    fn get(&self, key: &str) -> Result<Option<Value>, ServiceError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<(), ServiceError> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Ok(());
        }
        let line = serde_json::to_string(&JsonLine {
            key: key.to_string(),
            value: value.clone(),
        })?;
        {
            let mut writer = self.writer.lock();
            writeln!(writer, "{line}")?;
            writer.flush()?;
        }
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Memoizes expensive request computations by fingerprint.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    /// Opens a file-backed cache at `path`, or an in-memory one when no path is given.
    pub fn open(path: Option<&Path>) -> Result<Self, ServiceError> {
        match path {
            Some(path) => Ok(Self::new(Arc::new(JsonLinesStore::open(path)?))),
            None => Ok(Self::in_memory()),
        }
    }

    /// Returns the stored response for `key`, or computes, stores and returns it.
    /// The boolean is true when the response came from the cache. Errors from
    /// `compute` are returned as-is and nothing is stored.
    pub fn get<T, F>(&self, key: &str, compute: F) -> Result<(Timed<T>, bool), ServiceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, ServiceError>,
    {
        if let Some(value) = self.store.get(key)? {
            debug!(key_len = key.len(), "cache hit");
            let timed = serde_json::from_value(value)
                .map_err(|e| ServiceError::Cache(format!("corrupt cache entry: {e}")))?;
            return Ok((timed, true));
        }

        let timed = wrap_request_time(compute)?;
        let value = serde_json::to_value(&timed)?;
        match serde_json::from_value::<Timed<T>>(value.clone()) {
            Ok(_) => self.store.put(key, value)?,
            Err(err) => warn!(%err, "response cannot be read back from JSON, not caching it"),
        }
        Ok((timed, false))
    }
}

pub fn wrap_request_time<T, F>(compute: F) -> Result<Timed<T>, ServiceError>
where
    F: FnOnce() -> Result<T, ServiceError>,
{
    let request_datetime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let start = Instant::now();
    let response = compute()?;
    Ok(Timed {
        response,
        request_time: start.elapsed().as_secs_f64(),
        request_datetime,
    })
}

/// Canonical fingerprint of an adapted request. Object keys are sorted at every
/// level, so field order never affects the key. The evaluation request only
/// contributes its `random` salt.
pub fn make_cache_key<R: Serialize>(
    raw_request: &R,
    request: &Request,
) -> Result<CacheKey, ServiceError> {
    let mut value = serde_json::to_value(raw_request)?;
    if let Some(random) = &request.random {
        let object = value
            .as_object_mut()
            .ok_or_else(|| ServiceError::Cache("raw request must serialize to an object".into()))?;
        object.insert("random".to_string(), Value::String(random.clone()));
    }
    Ok(serde_json::to_string(&canonicalize(value))?)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
