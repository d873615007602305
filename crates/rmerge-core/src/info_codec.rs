// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! Schema-less key/value encoder/decoder over a self-delimited wire format (§4.1).
//!
//! The wire representation is JSON-shaped and implemented here directly on
//! `serde_json::Value`: it is ASCII, self-delimiting, human-diffable, and
//! gives us nested objects/tables for free. Item insertion order is
//! preserved with a `Vec`, never a hash-ordered map, so `encode` is
//! deterministic for a given sequence of `set` calls.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::error::{CoreError, Result};

/// One item's accumulated fields, in insertion order.
type Item = Vec<(String, Value)>;

/// Schema-less key/value codec (§4.1).
///
/// An `InfoCodec` is either encode-capable (it owns a pending item list) or
/// decode-only; both modes share the same type because most callers
/// round-trip through both roles over the lifetime of a connection.
pub struct InfoCodec {
    info_key: String,
    items: Mutex<Vec<Item>>,
    /// The item currently open for incremental `set` calls.
    current: Mutex<Item>,
    /// Decode-side: the item currently being probed by `get`.
    decode_cursor: Mutex<Option<Map<String, Value>>>,
}

impl InfoCodec {
    pub fn new(info_key: impl Into<String>) -> Self {
        Self {
            info_key: info_key.into(),
            items: Mutex::new(Vec::new()),
            current: Mutex::new(Vec::new()),
            decode_cursor: Mutex::new(None),
        }
    }

    /// Append `{key: value}` to the pending item's field list. Callers that
    /// also need to write the value through to an in-memory field do so at
    /// the call site (§9 design note: "one small helper per typed field" —
    /// see `McrtNodeInfo`'s setters for the pattern).
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.current.lock().push((key.to_string(), value.into()));
    }

    /// Serialize `"N v0 v1 ... v_{N-1}"` for a packed vector of floats.
    pub fn set_vec(&self, key: &str, values: &[f32]) {
        let mut s = values.len().to_string();
        for v in values {
            s.push(' ');
            s.push_str(&v.to_string());
        }
        self.current.lock().push((key.to_string(), Value::String(s)));
    }

    /// Close out the item currently being built and push it onto the pending list.
    pub fn commit_item(&self) {
        let item = std::mem::take(&mut *self.current.lock());
        if !item.is_empty() {
            self.items.lock().push(item);
        }
    }

    /// Fold `child`'s accumulated items into this codec as a nested value
    /// under `child_key`, then drain `child`.
    pub fn encode_child(&self, child_key: &str, child: &InfoCodec) {
        child.commit_item();
        let child_items = std::mem::take(&mut *child.items.lock());
        let value = items_to_value(&child.info_key, &child_items);
        self.current.lock().push((child_key.to_string(), value));
    }

    /// Fold `child` into this codec as an associative-table entry
    /// `table[item_key] = child-codec`.
    pub fn encode_table(&self, table_key: &str, item_key: &str, child: &InfoCodec) {
        child.commit_item();
        let child_items = std::mem::take(&mut *child.items.lock());
        let child_value = items_to_value(&child.info_key, &child_items);
        let mut table = Map::new();
        table.insert(item_key.to_string(), child_value);

        let mut cur = self.current.lock();
        if let Some((_, Value::Object(existing))) = cur.iter_mut().find(|(k, _)| k == table_key) {
            existing.insert(item_key.to_string(), table.remove(item_key).unwrap());
        } else {
            cur.push((table_key.to_string(), Value::Object(table)));
        }
    }

    /// Serialize `root = { infoKey: [ item, ... ] }` and drain the item list.
    /// Returns `false` (not an error) if there was nothing to encode.
    pub fn encode(&self) -> (bool, Vec<u8>) {
        self.commit_item();
        let items = std::mem::take(&mut *self.items.lock());
        if items.is_empty() {
            return (false, Vec::new());
        }
        let root = items_to_value(&self.info_key, &items);
        let bytes = serde_json::to_vec(&root).expect("serde_json::Value serialization cannot fail");
        (true, bytes)
    }

    /// Parse `bytes`, iterate items, invoking `visitor` once per item with a
    /// cursor scoped to that item so `get` can probe its fields. Returns the
    /// number of items consumed, or `Err` on parse failure (in-memory state
    /// is unchanged either way — there is none to mutate here).
    pub fn decode(&self, bytes: &[u8], mut visitor: impl FnMut(&InfoCodec) -> bool) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let root: Value = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::MalformedInfoRecord(e.to_string()))?;
        let items = root
            .get(&self.info_key)
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::MalformedInfoRecord(format!("missing root key '{}'", self.info_key)))?;

        let mut consumed = 0;
        for item in items {
            let obj = item
                .as_object()
                .ok_or_else(|| CoreError::MalformedInfoRecord("item is not an object".to_string()))?;
            *self.decode_cursor.lock() = Some(obj.clone());
            consumed += 1;
            if !visitor(self) {
                break;
            }
        }
        Ok(consumed)
    }

    /// Probe the current decode-cursor item for `key`; `None` if absent
    /// (a missing key is not an error, per §4.1).
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.decode_cursor.lock().as_ref()?.get(key)?.as_str().map(String::from)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.decode_cursor.lock().as_ref()?.get(key)?.as_i64()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.decode_cursor.lock().as_ref()?.get(key)?.as_u64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.decode_cursor.lock().as_ref()?.get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.decode_cursor.lock().as_ref()?.get(key)?.as_bool()
    }

    pub fn get_vec_f32(&self, key: &str) -> Option<Vec<f32>> {
        let raw = self.get_str(key)?;
        let mut parts = raw.split_whitespace();
        let n: usize = parts.next()?.parse().ok()?;
        let values: Vec<f32> = parts.filter_map(|p| p.parse().ok()).collect();
        (values.len() == n).then_some(values)
    }

    /// Probe a nested child codec under `key` for the current item; invokes
    /// `visitor` on a fresh decode-only `InfoCodec` scoped to the child value.
    pub fn get_child(&self, key: &str, child_info_key: &str, visitor: impl FnMut(&InfoCodec) -> bool) -> Option<usize> {
        let value = self.decode_cursor.lock().as_ref()?.get(key)?.clone();
        let child = InfoCodec::new(child_info_key);
        let bytes = serde_json::to_vec(&value).ok()?;
        child.decode(&bytes, visitor).ok()
    }

    /// Probe an associative-table entry `table[item_key]` for the current
    /// item and decode it as a child codec.
    pub fn get_table_entry(
        &self,
        table_key: &str,
        item_key: &str,
        child_info_key: &str,
        visitor: impl FnMut(&InfoCodec) -> bool,
    ) -> Option<usize> {
        let table = self.decode_cursor.lock().as_ref()?.get(table_key)?.clone();
        let entry = table.get(item_key)?.clone();
        let child = InfoCodec::new(child_info_key);
        let bytes = serde_json::to_vec(&entry).ok()?;
        child.decode(&bytes, visitor).ok()
    }

    /// Keys present in the table under `table_key` for the current item.
    pub fn table_keys(&self, table_key: &str) -> Vec<String> {
        self.decode_cursor
            .lock()
            .as_ref()
            .and_then(|cur| cur.get(table_key))
            .and_then(Value::as_object)
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn items_to_value(info_key: &str, items: &[Item]) -> Value {
    let array: Vec<Value> = items
        .iter()
        .map(|item| {
            let mut obj = Map::new();
            for (k, v) in item {
                obj.insert(k.clone(), v.clone());
            }
            Value::Object(obj)
        })
        .collect();
    json!({ info_key: array })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_of_empty_codec_is_not_an_error() {
        let codec = InfoCodec::new("stats");
        let (ok, bytes) = codec.encode();
        assert!(!ok);
        assert!(bytes.is_empty());
    }

    #[test]
    fn scalar_round_trips() {
        // Property #5: get(decode(encode({k:v}))) == v
        let codec = InfoCodec::new("stats");
        codec.set("hostName", Value::String("node-a".into()));
        codec.set("cpuCount", Value::from(16u64));
        codec.commit_item();
        let (ok, bytes) = codec.encode();
        assert!(ok);

        let decoder = InfoCodec::new("stats");
        let mut seen_host = None;
        let mut seen_cpu = None;
        decoder
            .decode(&bytes, |item| {
                seen_host = item.get_str("hostName");
                seen_cpu = item.get_u64("cpuCount");
                true
            })
            .unwrap();
        assert_eq!(seen_host.as_deref(), Some("node-a"));
        assert_eq!(seen_cpu, Some(16));
    }

    #[test]
    fn packed_vec_round_trips() {
        let codec = InfoCodec::new("stats");
        codec.set_vec("cpuUsage", &[0.1, 0.2, 0.3]);
        codec.commit_item();
        let (_, bytes) = codec.encode();

        let decoder = InfoCodec::new("stats");
        let mut seen = None;
        decoder
            .decode(&bytes, |item| {
                seen = item.get_vec_f32("cpuUsage");
                true
            })
            .unwrap();
        assert_eq!(seen, Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn malformed_input_fails_without_panicking() {
        let codec = InfoCodec::new("stats");
        let result = codec.decode(b"{not json", |_| true);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_keys_are_silently_skipped() {
        let codec = InfoCodec::new("stats");
        codec.set("hostName", Value::String("a".into()));
        codec.set("somethingFromTheFuture", Value::from(1u64));
        codec.commit_item();
        let (_, bytes) = codec.encode();

        let decoder = InfoCodec::new("stats");
        let mut seen_host = None;
        decoder
            .decode(&bytes, |item| {
                seen_host = item.get_str("hostName");
                true
            })
            .unwrap();
        assert_eq!(seen_host.as_deref(), Some("a"));
    }

    #[test]
    fn nested_child_round_trips() {
        let parent = InfoCodec::new("fleet");
        let child = InfoCodec::new("node");
        child.set("machineId", Value::from(3u64));
        parent.encode_child("mcrtNode", &child);
        parent.commit_item();
        let (_, bytes) = parent.encode();

        let decoder = InfoCodec::new("fleet");
        let mut seen = None;
        decoder
            .decode(&bytes, |item| {
                item.get_child("mcrtNode", "node", |node| {
                    seen = node.get_u64("machineId");
                    true
                });
                true
            })
            .unwrap();
        assert_eq!(seen, Some(3));
    }

    #[test]
    fn table_round_trips_two_entries() {
        // S6: two MCRT nodes (ids 3 and 7) under an associative table.
        let parent = InfoCodec::new("fleet");
        for id in [3u64, 7] {
            let child = InfoCodec::new("node");
            child.set("machineId", Value::from(id));
            parent.encode_table("mcrtNodeInfoMap", &id.to_string(), &child);
        }
        parent.commit_item();
        let (_, bytes) = parent.encode();

        let decoder = InfoCodec::new("fleet");
        let mut keys = Vec::new();
        decoder
            .decode(&bytes, |item| {
                keys = item.table_keys("mcrtNodeInfoMap");
                true
            })
            .unwrap();
        keys.sort();
        assert_eq!(keys, vec!["3".to_string(), "7".to_string()]);
    }
}
