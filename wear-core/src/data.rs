//! Data sync store: named, versioned key-value items pushed whole to the data layer, and
//! fan-out of remote item changes to data listeners.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec;
use crate::error::{CodecError, DataError};
use crate::host::{DataLayer, Event, EventSink};
use crate::registry::ListenerId;
use crate::value::{DynamicMap, Payload};

/// One synchronized item: path, store-assigned version, encoded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub path: String,
    pub version: u64,
    pub data: Vec<u8>,
}

impl DataItem {
    pub fn payload(&self) -> Result<Payload, CodecError> {
        codec::decode(&self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEventKind {
    Changed,
    Deleted,
}

/// Remote data layer notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub kind: DataEventKind,
    pub item: DataItem,
}

impl DataEvent {
    pub fn changed(item: DataItem) -> Self {
        Self {
            kind: DataEventKind::Changed,
            item,
        }
    }

    /// Deleted items carry only their path.
    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            kind: DataEventKind::Deleted,
            item: DataItem {
                path: path.into(),
                version: 0,
                data: Vec::new(),
            },
        }
    }
}

/// Local items by path. Last write wins; every write gets the next version.
#[derive(Debug, Default)]
pub struct DataSyncStore {
    items: HashMap<String, DataItem>,
    last_version: u64,
}

impl DataSyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write locally, then hand the item to `layer` without waiting for it.
    /// Must be called from within a Tokio runtime.
    pub fn set_data(
        &mut self,
        path: &str,
        map: &DynamicMap,
        layer: &Arc<dyn DataLayer>,
    ) -> Result<DataItem, DataError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DataError::NoRuntime)?;
        let item = self.write(path, map)?;
        let layer = layer.clone();
        let published = item.clone();
        runtime.spawn(async move {
            let path = published.path.clone();
            match layer.put_data_item(published).await {
                Ok(()) => debug!(path = %path, "set data on peers"),
                Err(e) => warn!(path = %path, error = %e, "data item not published"),
            }
        });
        Ok(item)
    }

    /// Local write only: validate, convert, encode, assign the next version.
    pub fn write(&mut self, path: &str, map: &DynamicMap) -> Result<DataItem, DataError> {
        validate_path(path)?;
        let data = codec::encode_dynamic(map)?;
        self.last_version += 1;
        let item = DataItem {
            path: path.to_string(),
            version: self.last_version,
            data,
        };
        self.items.insert(item.path.clone(), item.clone());
        Ok(item)
    }

    /// Remove locally and ask `layer` to delete it on peers. Returns whether the item existed here.
    pub fn delete_data(&mut self, path: &str, layer: &Arc<dyn DataLayer>) -> Result<bool, DataError> {
        validate_path(path)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DataError::NoRuntime)?;
        let existed = self.items.remove(path).is_some();
        let layer = layer.clone();
        let path = path.to_string();
        runtime.spawn(async move {
            if let Err(e) = layer.delete_data_item(&path).await {
                warn!(path = %path, error = %e, "data item deletion not published");
            }
        });
        Ok(existed)
    }

    pub fn get(&self, path: &str) -> Option<&DataItem> {
        self.items.get(path)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn validate_path(path: &str) -> Result<(), DataError> {
    if !path.starts_with('/') {
        return Err(DataError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Fan remote changes out to data listeners. Deletions are not forwarded and an item that
/// does not decode is skipped. Returns the number of deliveries made.
pub fn fan_out_changes(events: &[DataEvent], listeners: &[ListenerId], sink: &dyn EventSink) -> usize {
    let mut delivered = 0;
    for event in events {
        if event.kind != DataEventKind::Changed {
            continue;
        }
        let payload = match event.item.payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %event.item.path, error = %e, "dropping undecodable data item");
                continue;
            }
        };
        for &id in listeners {
            sink.deliver(Event::DataChanged {
                id,
                path: event.item.path.clone(),
                args: payload.clone(),
            });
            delivered += 1;
        }
    }
    delivered
}
