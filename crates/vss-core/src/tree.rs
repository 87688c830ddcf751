//! The in-memory VSS signal tree.
//!
//! The tree is created once at startup from a VSS JSON document and holds the
//! typed latest value per leaf. Interior structure only changes through
//! metadata updates by channels holding the modify-tree capability. Locking
//! is owned by the server layer; this type is plain data.

use crate::channel::Channel;
use crate::error::CoreError;
use crate::path::{Path, WILDCARD};
use crate::types::{coerce, Datatype, SignalValue};
use chrono::Utc;
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashSet};

/// Placeholder rendered for leaves that have never been written.
pub const NEVER_WRITTEN: &str = "---";

/// Node classification from the VSS `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Branch,
    Sensor,
    Actuator,
    Attribute,
}

impl NodeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "branch" => Some(Self::Branch),
            "sensor" => Some(Self::Sensor),
            "actuator" => Some(Self::Actuator),
            "attribute" => Some(Self::Attribute),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Branch => "branch",
            Self::Sensor => "sensor",
            Self::Actuator => "actuator",
            Self::Attribute => "attribute",
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, Self::Branch)
    }
}

/// A single node in the signal tree.
///
/// Children are kept in a `BTreeMap` so every traversal is deterministic:
/// depth-first, alphabetical by name at each level.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_type: NodeType,
    pub uuid: String,
    pub description: Option<String>,
    pub datatype: Option<Datatype>,
    pub unit: Option<String>,
    pub min: Option<Number>,
    pub max: Option<Number>,
    pub allowed: Option<Vec<String>>,
    pub value: Option<SignalValue>,
    /// Unix seconds of the last successful set; 0 = never written.
    pub timestamp: i64,
    pub children: BTreeMap<String, Node>,
    /// Metadata keys outside the known set, preserved verbatim.
    extra: Map<String, Value>,
}

impl Node {
    fn from_json(name: &str, value: &Value, seen: &mut HashSet<String>) -> Result<Self, CoreError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CoreError::Schema(format!("invalid node name \"{name}\"")));
        }
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::Schema(format!("node {name} is not an object")))?;

        let type_str = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Schema(format!("node {name} lacks a type")))?;
        let node_type = NodeType::parse(type_str)
            .ok_or_else(|| CoreError::Schema(format!("node {name} has unknown type {type_str}")))?;

        let uuid = obj
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Schema(format!("node {name} lacks a uuid")))?
            .to_string();
        if !seen.insert(uuid.clone()) {
            return Err(CoreError::Schema(format!(
                "duplicate uuid {uuid} at node {name}"
            )));
        }

        let datatype = if node_type.is_leaf() {
            let dt = obj
                .get("datatype")
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::Schema(format!("leaf {name} lacks a datatype")))?;
            Some(Datatype::parse(dt).ok_or_else(|| {
                CoreError::Schema(format!("leaf {name} has unknown datatype {dt}"))
            })?)
        } else {
            None
        };

        let mut node = Node {
            node_type,
            uuid,
            description: None,
            datatype,
            unit: None,
            min: None,
            max: None,
            allowed: None,
            value: None,
            timestamp: 0,
            children: BTreeMap::new(),
            extra: Map::new(),
        };

        for (key, v) in obj {
            match key.as_str() {
                "type" | "uuid" | "datatype" | "timestamp" => {}
                "description" => node.description = v.as_str().map(str::to_string),
                "unit" => node.unit = v.as_str().map(str::to_string),
                "min" => node.min = v.as_number().cloned(),
                "max" => node.max = v.as_number().cloned(),
                "enum" => {
                    let list = v
                        .as_array()
                        .map(|a| {
                            a.iter()
                                .map(|e| e.as_str().map(str::to_string))
                                .collect::<Option<Vec<_>>>()
                        })
                        .unwrap_or(None)
                        .ok_or_else(|| {
                            CoreError::Schema(format!("enum of {name} must be a string array"))
                        })?;
                    node.allowed = Some(list);
                }
                "children" => {
                    if node_type.is_leaf() {
                        return Err(CoreError::Schema(format!("leaf {name} carries children")));
                    }
                    let children = v.as_object().ok_or_else(|| {
                        CoreError::Schema(format!("children of {name} is not an object"))
                    })?;
                    for (child_name, child) in children {
                        node.children
                            .insert(child_name.clone(), Node::from_json(child_name, child, seen)?);
                    }
                }
                "value" => {
                    if let Some(datatype) = node.datatype {
                        node.value = Some(coerce(datatype, v, None, None, None).map_err(|e| {
                            CoreError::Schema(format!("initial value of {name}: {e}"))
                        })?);
                    }
                }
                _ => {
                    node.extra.insert(key.clone(), v.clone());
                }
            }
        }
        Ok(node)
    }

    /// The node's metadata as JSON: everything except `value`/`timestamp`,
    /// children included when `with_children` is set.
    fn metadata_json(&self, with_children: bool) -> Value {
        let mut out = Map::new();
        if let Some(description) = &self.description {
            out.insert("description".to_string(), Value::from(description.clone()));
        }
        out.insert("type".to_string(), Value::from(self.node_type.as_str()));
        out.insert("uuid".to_string(), Value::from(self.uuid.clone()));
        if let Some(datatype) = self.datatype {
            out.insert("datatype".to_string(), Value::from(datatype.as_str()));
        }
        if let Some(unit) = &self.unit {
            out.insert("unit".to_string(), Value::from(unit.clone()));
        }
        if let Some(min) = &self.min {
            out.insert("min".to_string(), Value::Number(min.clone()));
        }
        if let Some(max) = &self.max {
            out.insert("max".to_string(), Value::Number(max.clone()));
        }
        if let Some(allowed) = &self.allowed {
            out.insert(
                "enum".to_string(),
                Value::Array(allowed.iter().cloned().map(Value::from).collect()),
            );
        }
        for (key, v) in &self.extra {
            out.insert(key.clone(), v.clone());
        }
        if with_children && self.node_type == NodeType::Branch {
            let mut children = Map::new();
            for (name, child) in &self.children {
                children.insert(name.clone(), child.metadata_json(true));
            }
            out.insert("children".to_string(), Value::Object(children));
        }
        Value::Object(out)
    }

    fn value_json(&self) -> Value {
        self.value
            .as_ref()
            .map(SignalValue::to_json)
            .unwrap_or_else(|| Value::from(NEVER_WRITTEN))
    }
}

/// Value and metadata views handed to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalView {
    /// A single leaf: its canonical path, latest value and write timestamp.
    Leaf {
        path: String,
        value: Value,
        timestamp: i64,
    },
    /// A branch: every descendant leaf path mapped to its latest value.
    Branch {
        path: String,
        values: BTreeMap<String, Value>,
    },
}

/// The typed hierarchical signal store.
#[derive(Debug, Clone)]
pub struct SignalTree {
    root: BTreeMap<String, Node>,
}

impl SignalTree {
    /// Parse a VSS JSON document into the tree.
    ///
    /// Fails with `Schema` when a node lacks `type`, a leaf lacks `datatype`,
    /// or UUIDs are missing or duplicated.
    pub fn from_document(document: &Value) -> Result<Self, CoreError> {
        let obj = document
            .as_object()
            .ok_or_else(|| CoreError::Schema("document root must be an object".to_string()))?;
        let mut seen = HashSet::new();
        let mut root = BTreeMap::new();
        for (name, child) in obj {
            root.insert(name.clone(), Node::from_json(name, child, &mut seen)?);
        }
        Ok(Self { root })
    }

    fn node_at(&self, segments: &[String]) -> Option<&Node> {
        let (first, rest) = segments.split_first()?;
        let mut node = self.root.get(first)?;
        for segment in rest {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    fn node_at_mut(&mut self, segments: &[String]) -> Option<&mut Node> {
        let (first, rest) = segments.split_first()?;
        let mut node = self.root.get_mut(first)?;
        for segment in rest {
            node = node.children.get_mut(segment)?;
        }
        Some(node)
    }

    /// Look up a single node by a non-wildcard path.
    pub fn node(&self, path: &Path) -> Option<&Node> {
        if path.is_wildcard() {
            return None;
        }
        self.node_at(path.segments())
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&Node> = self.root.values().collect();
        while let Some(node) = stack.pop() {
            if node.node_type.is_leaf() {
                count += 1;
            } else {
                stack.extend(node.children.values());
            }
        }
        count
    }

    /// Resolve a possibly wildcarded path to the leaf paths it matches.
    ///
    /// A `*` segment matches all direct children at that position; a branch
    /// endpoint expands to all descendant leaves. Order is deterministic
    /// depth-first, alphabetical at each level. Empty when nothing matches.
    pub fn get_leaf_paths(&self, path: &Path) -> Vec<Path> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        collect_matches(&self.root, path.segments(), &mut prefix, &mut out);
        out
    }

    /// Value view for a single leaf or a whole branch (non-wildcard).
    pub fn get_signal(&self, path: &Path) -> Result<SignalView, CoreError> {
        if path.is_wildcard() {
            return Err(CoreError::PathNotValid(path.as_str().to_string()));
        }
        let node = self
            .node_at(path.segments())
            .ok_or_else(|| CoreError::PathNotFound(path.as_str().to_string()))?;
        if node.node_type.is_leaf() {
            return Ok(SignalView::Leaf {
                path: path.as_str().to_string(),
                value: node.value_json(),
                timestamp: node.timestamp,
            });
        }
        let mut values = BTreeMap::new();
        let mut prefix = path.segments().to_vec();
        collect_branch_values(node, &mut prefix, &mut values);
        Ok(SignalView::Branch {
            path: path.as_str().to_string(),
            values,
        })
    }

    /// Metadata for the matched node, nested inside its ancestor chain and
    /// stripped of `value`/`timestamp` at every depth.
    pub fn get_metadata(&self, path: &Path) -> Result<Value, CoreError> {
        if path.is_wildcard() {
            return Err(CoreError::PathNotValid(path.as_str().to_string()));
        }
        let segments = path.segments();
        let node = self
            .node_at(segments)
            .ok_or_else(|| CoreError::PathNotFound(path.as_str().to_string()))?;

        let last = segments
            .last()
            .ok_or_else(|| CoreError::PathNotFound(path.as_str().to_string()))?;
        let mut wrapped = Map::new();
        wrapped.insert(last.clone(), node.metadata_json(true));

        for depth in (0..segments.len() - 1).rev() {
            let ancestor = self
                .node_at(&segments[..=depth])
                .ok_or_else(|| CoreError::PathNotFound(path.as_str().to_string()))?;
            let mut meta = match ancestor.metadata_json(false) {
                Value::Object(m) => m,
                _ => Map::new(),
            };
            meta.insert("children".to_string(), Value::Object(wrapped));
            wrapped = Map::new();
            wrapped.insert(segments[depth].clone(), Value::Object(meta));
        }
        Ok(Value::Object(wrapped))
    }

    /// The whole document with every `value`/`timestamp` stripped; inverse of
    /// `from_document` for documents without initial values.
    pub fn dump_metadata(&self) -> Value {
        let mut out = Map::new();
        for (name, node) in &self.root {
            out.insert(name.clone(), node.metadata_json(true));
        }
        Value::Object(out)
    }

    /// Type-check and store a value, returning `(uuid, coerced value)` pairs
    /// for the subscription engine, one per affected leaf in discovery order.
    ///
    /// A wildcard path requires `value` to be an array of single-entry
    /// `{name: value}` objects naming the wildcard's direct children. Nothing
    /// is written unless every target resolves, coerces and passes the write
    /// permission check.
    pub fn set_signal(
        &mut self,
        channel: &Channel,
        path: &Path,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, CoreError> {
        let targets = self.resolve_set_targets(channel, path, value)?;

        let now = Utc::now().timestamp();
        let mut emitted = Vec::with_capacity(targets.len());
        for (segments, coerced) in targets {
            let node = self
                .node_at_mut(&segments)
                .ok_or_else(|| CoreError::Generic(format!("{} vanished during set", segments.join("."))))?;
            node.value = Some(coerced.clone());
            node.timestamp = now;
            emitted.push((node.uuid.clone(), coerced.to_json()));
        }
        Ok(emitted)
    }

    fn resolve_set_targets(
        &self,
        channel: &Channel,
        path: &Path,
        value: &Value,
    ) -> Result<Vec<(Vec<String>, SignalValue)>, CoreError> {
        if !path.is_wildcard() {
            let target = self.resolve_one_set_target(channel, path.segments().to_vec(), value)?;
            return Ok(vec![target]);
        }

        let entries = value.as_array().ok_or_else(|| {
            CoreError::Generic(format!(
                "setting {path} requires an array of name/value pairs"
            ))
        })?;
        let star = path
            .segments()
            .iter()
            .position(|s| s == WILDCARD)
            .ok_or_else(|| CoreError::Generic(format!("no wildcard in {path}")))?;

        let mut targets = Vec::with_capacity(entries.len());
        for entry in entries {
            let obj = entry
                .as_object()
                .filter(|o| o.len() == 1)
                .ok_or_else(|| {
                    CoreError::Generic(
                        "each wildcard entry must hold exactly one signal".to_string(),
                    )
                })?;
            // zipped by name, never by index
            let (name, v) = obj
                .iter()
                .next()
                .ok_or_else(|| CoreError::Generic("empty wildcard entry".to_string()))?;
            let suffix = Path::parse(name)?;
            let mut segments: Vec<String> = path.segments()[..star].to_vec();
            segments.extend(suffix.segments().iter().cloned());
            targets.push(self.resolve_one_set_target(channel, segments, v)?);
        }
        Ok(targets)
    }

    fn resolve_one_set_target(
        &self,
        channel: &Channel,
        segments: Vec<String>,
        value: &Value,
    ) -> Result<(Vec<String>, SignalValue), CoreError> {
        let canonical = segments.join(".");
        let node = self
            .node_at(&segments)
            .ok_or_else(|| CoreError::PathNotValid(canonical.clone()))?;
        if !node.node_type.is_leaf() {
            return Err(CoreError::NotALeaf(canonical));
        }
        if !channel.can_write(&canonical) {
            return Err(CoreError::NoPermission(format!(
                "no write access to {canonical}"
            )));
        }
        let datatype = node
            .datatype
            .ok_or_else(|| CoreError::Generic(format!("leaf {canonical} lacks a datatype")))?;
        let coerced = coerce(
            datatype,
            value,
            node.min.as_ref().and_then(Number::as_f64),
            node.max.as_ref().and_then(Number::as_f64),
            node.allowed.as_deref(),
        )?;
        Ok((segments, coerced))
    }

    /// Merge a metadata patch into the matched node. Requires the channel's
    /// modify-tree capability. `uuid`, `type`, `value`, `timestamp` and
    /// `children` are never patched.
    pub fn update_metadata(
        &mut self,
        channel: &Channel,
        path: &Path,
        patch: &Value,
    ) -> Result<(), CoreError> {
        if !channel.can_modify_tree() {
            return Err(CoreError::NoPermission(
                "channel may not modify the signal tree".to_string(),
            ));
        }
        if path.is_wildcard() {
            return Err(CoreError::PathNotValid(path.as_str().to_string()));
        }
        let node = self
            .node_at_mut(path.segments())
            .ok_or_else(|| CoreError::PathNotValid(path.as_str().to_string()))?;
        let obj = patch
            .as_object()
            .ok_or_else(|| CoreError::Generic("metadata patch must be an object".to_string()))?;

        for (key, v) in obj {
            match key.as_str() {
                "uuid" | "type" | "value" | "timestamp" | "children" => {}
                "description" => {
                    node.description = Some(require_str(key, v)?);
                }
                "unit" => {
                    node.unit = Some(require_str(key, v)?);
                }
                "datatype" => {
                    let dt = require_str(key, v)?;
                    node.datatype = Some(Datatype::parse(&dt).ok_or_else(|| {
                        CoreError::Generic(format!("unknown datatype \"{dt}\" in patch"))
                    })?);
                }
                "min" => {
                    node.min = Some(require_number(key, v)?);
                }
                "max" => {
                    node.max = Some(require_number(key, v)?);
                }
                _ => {
                    node.extra.insert(key.clone(), v.clone());
                }
            }
        }
        Ok(())
    }
}

fn require_str(key: &str, v: &Value) -> Result<String, CoreError> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| CoreError::Generic(format!("metadata key {key} must be a string")))
}

fn require_number(key: &str, v: &Value) -> Result<Number, CoreError> {
    v.as_number()
        .cloned()
        .ok_or_else(|| CoreError::Generic(format!("metadata key {key} must be a number")))
}

fn collect_matches(
    nodes: &BTreeMap<String, Node>,
    tokens: &[String],
    prefix: &mut Vec<String>,
    out: &mut Vec<Path>,
) {
    let Some((head, rest)) = tokens.split_first() else {
        return;
    };
    if head == WILDCARD {
        for (name, node) in nodes {
            prefix.push(name.clone());
            descend(node, rest, prefix, out);
            prefix.pop();
        }
    } else if let Some(node) = nodes.get(head) {
        prefix.push(head.clone());
        descend(node, rest, prefix, out);
        prefix.pop();
    }
}

fn descend(node: &Node, rest: &[String], prefix: &mut Vec<String>, out: &mut Vec<Path>) {
    if rest.is_empty() {
        collect_leaves(node, prefix, out);
    } else if node.node_type == NodeType::Branch {
        collect_matches(&node.children, rest, prefix, out);
    }
    // tokens remaining below a leaf match nothing
}

fn collect_leaves(node: &Node, prefix: &mut Vec<String>, out: &mut Vec<Path>) {
    if node.node_type.is_leaf() {
        out.push(Path::from_segments(prefix.clone()));
        return;
    }
    for (name, child) in &node.children {
        prefix.push(name.clone());
        collect_leaves(child, prefix, out);
        prefix.pop();
    }
}

fn collect_branch_values(node: &Node, prefix: &mut Vec<String>, out: &mut BTreeMap<String, Value>) {
    if node.node_type.is_leaf() {
        out.insert(prefix.join("."), node.value_json());
        return;
    }
    for (name, child) in &node.children {
        prefix.push(name.clone());
        collect_branch_values(child, prefix, out);
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Permission;
    use serde_json::json;
    use std::collections::HashMap;

    fn test_document() -> Value {
        json!({
            "Vehicle": {
                "description": "High-level vehicle data.",
                "type": "branch",
                "uuid": "1c72453e738511e9b29ad46a6a4b77e9",
                "children": {
                    "Acceleration": {
                        "description": "Spatial acceleration",
                        "type": "branch",
                        "uuid": "ce0fb48b566354c7841e279125f6f66d",
                        "children": {
                            "Lateral": {
                                "datatype": "int32",
                                "description": "Vehicle acceleration in Y (lateral acceleration).",
                                "type": "sensor",
                                "unit": "m/s2",
                                "uuid": "5c28427f79ca5fe394b47fe057a2af9b"
                            },
                            "Longitudinal": {
                                "datatype": "int32",
                                "description": "Vehicle acceleration in X (longitudinal acceleration).",
                                "type": "sensor",
                                "unit": "m/s2",
                                "uuid": "c83f0c12653b5e7baf000799052f5533"
                            },
                            "Vertical": {
                                "datatype": "int32",
                                "description": "Vehicle acceleration in Z (vertical acceleration).",
                                "type": "sensor",
                                "unit": "m/s2",
                                "uuid": "9521e8d36a9b546d9414a779f5dd9bef"
                            }
                        }
                    },
                    "Gear": {
                        "datatype": "int8",
                        "description": "Current gear, negative for reverse.",
                        "type": "sensor",
                        "uuid": "b4f2dd67d1d85d5ea6ce4b4b65ba2d6d"
                    },
                    "Identification": {
                        "description": "Identification attributes.",
                        "type": "branch",
                        "uuid": "94dc176e03f5574e9b8cf9b0b9c46a6f",
                        "children": {
                            "VIN": {
                                "datatype": "string",
                                "description": "17-character VIN.",
                                "type": "attribute",
                                "uuid": "6f0b6fa8c34f5f59a4d8e2e4e9b6f1aa"
                            }
                        }
                    }
                }
            }
        })
    }

    fn rw_channel(tree: &SignalTree) -> Channel {
        let mut channel = Channel::new(10_000_000);
        let mut perms = HashMap::new();
        for leaf in tree.get_leaf_paths(&Path::parse("Vehicle").unwrap()) {
            perms.insert(leaf.as_str().to_string(), Permission::parse("rw").unwrap());
        }
        channel.authorize(i64::MAX, perms, true);
        channel
    }

    #[test]
    fn test_init_from_document() {
        let tree = SignalTree::from_document(&test_document()).unwrap();
        assert_eq!(tree.leaf_count(), 5);
    }

    #[test]
    fn test_init_rejects_missing_type() {
        let doc = json!({"Vehicle": {"uuid": "aa", "children": {}}});
        assert!(matches!(
            SignalTree::from_document(&doc),
            Err(CoreError::Schema(_))
        ));
    }

    #[test]
    fn test_init_rejects_leaf_without_datatype() {
        let doc = json!({"Speed": {"type": "sensor", "uuid": "aa"}});
        assert!(matches!(
            SignalTree::from_document(&doc),
            Err(CoreError::Schema(_))
        ));
    }

    #[test]
    fn test_init_rejects_duplicate_uuid() {
        let doc = json!({
            "A": {"type": "sensor", "datatype": "int8", "uuid": "same"},
            "B": {"type": "sensor", "datatype": "int8", "uuid": "same"}
        });
        let err = SignalTree::from_document(&doc).unwrap_err();
        assert!(matches!(err, CoreError::Schema(m) if m.contains("duplicate uuid")));
    }

    #[test]
    fn test_leaf_paths_of_branch_are_sorted_depth_first() {
        let tree = SignalTree::from_document(&test_document()).unwrap();
        let paths: Vec<String> = tree
            .get_leaf_paths(&Path::parse("Vehicle").unwrap())
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "Vehicle.Acceleration.Lateral",
                "Vehicle.Acceleration.Longitudinal",
                "Vehicle.Acceleration.Vertical",
                "Vehicle.Gear",
                "Vehicle.Identification.VIN",
            ]
        );
    }

    #[test]
    fn test_leaf_paths_resolve_to_themselves() {
        let tree = SignalTree::from_document(&test_document()).unwrap();
        for leaf in tree.get_leaf_paths(&Path::parse("Vehicle").unwrap()) {
            let again = tree.get_leaf_paths(&leaf);
            assert_eq!(again, vec![leaf]);
        }
    }

    #[test]
    fn test_leaf_paths_wildcard_single_level() {
        let tree = SignalTree::from_document(&test_document()).unwrap();
        let paths = tree.get_leaf_paths(&Path::parse("Vehicle.Acceleration.*").unwrap());
        assert_eq!(paths.len(), 3);

        let mid = tree.get_leaf_paths(&Path::parse("Vehicle.*.Vertical").unwrap());
        assert_eq!(mid.len(), 1);
        assert_eq!(mid[0].as_str(), "Vehicle.Acceleration.Vertical");
    }

    #[test]
    fn test_leaf_paths_unknown_path_is_empty() {
        let tree = SignalTree::from_document(&test_document()).unwrap();
        assert!(tree
            .get_leaf_paths(&Path::parse("Vehicle.Unknown").unwrap())
            .is_empty());
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        let path = Path::parse("Vehicle.Acceleration.Vertical").unwrap();

        let emitted = tree.set_signal(&channel, &path, &json!(10)).unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, "9521e8d36a9b546d9414a779f5dd9bef");
        assert_eq!(emitted[0].1, json!(10));

        match tree.get_signal(&path).unwrap() {
            SignalView::Leaf {
                path,
                value,
                timestamp,
            } => {
                assert_eq!(path, "Vehicle.Acceleration.Vertical");
                assert_eq!(value, json!(10));
                assert!(timestamp > 0);
            }
            other => panic!("expected leaf view, got {other:?}"),
        }
    }

    #[test]
    fn test_get_never_written_leaf() {
        let tree = SignalTree::from_document(&test_document()).unwrap();
        match tree
            .get_signal(&Path::parse("Vehicle.Gear").unwrap())
            .unwrap()
        {
            SignalView::Leaf {
                value, timestamp, ..
            } => {
                assert_eq!(value, json!(NEVER_WRITTEN));
                assert_eq!(timestamp, 0);
            }
            other => panic!("expected leaf view, got {other:?}"),
        }
    }

    #[test]
    fn test_get_branch_maps_all_leaves() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        tree.set_signal(
            &channel,
            &Path::parse("Vehicle.Acceleration.Lateral").unwrap(),
            &json!(3),
        )
        .unwrap();

        match tree
            .get_signal(&Path::parse("Vehicle.Acceleration").unwrap())
            .unwrap()
        {
            SignalView::Branch { path, values } => {
                assert_eq!(path, "Vehicle.Acceleration");
                assert_eq!(values.len(), 3);
                assert_eq!(values["Vehicle.Acceleration.Lateral"], json!(3));
                assert_eq!(
                    values["Vehicle.Acceleration.Vertical"],
                    json!(NEVER_WRITTEN)
                );
            }
            other => panic!("expected branch view, got {other:?}"),
        }
    }

    #[test]
    fn test_get_signal_unknown_path() {
        let tree = SignalTree::from_document(&test_document()).unwrap();
        assert!(matches!(
            tree.get_signal(&Path::parse("Vehicle.Nope").unwrap()),
            Err(CoreError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_set_on_branch_is_rejected() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        let err = tree
            .set_signal(
                &channel,
                &Path::parse("Vehicle.Acceleration").unwrap(),
                &json!(1),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NotALeaf(_)));
    }

    #[test]
    fn test_set_without_permission_leaves_tree_unchanged() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = Channel::new(10_000_000);
        let path = Path::parse("Vehicle.Acceleration.Vertical").unwrap();

        let err = tree.set_signal(&channel, &path, &json!(5)).unwrap_err();
        assert!(matches!(err, CoreError::NoPermission(_)));

        match tree.get_signal(&path).unwrap() {
            SignalView::Leaf { value, .. } => assert_eq!(value, json!(NEVER_WRITTEN)),
            other => panic!("expected leaf view, got {other:?}"),
        }
    }

    #[test]
    fn test_set_out_of_bounds_int8() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        let err = tree
            .set_signal(&channel, &Path::parse("Vehicle.Gear").unwrap(), &json!(500))
            .unwrap_err();
        assert!(matches!(err, CoreError::OutOfBounds(_)));
    }

    #[test]
    fn test_wildcard_set_zips_by_name() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        let path = Path::parse("Vehicle.Acceleration.*").unwrap();
        let values = json!([{"Vertical": 7}, {"Lateral": 2}]);

        let emitted = tree.set_signal(&channel, &path, &values).unwrap();
        assert_eq!(emitted.len(), 2);
        // discovery order follows the value array, not tree order
        assert_eq!(emitted[0].0, "9521e8d36a9b546d9414a779f5dd9bef");
        assert_eq!(emitted[1].0, "5c28427f79ca5fe394b47fe057a2af9b");
    }

    #[test]
    fn test_wildcard_set_unmatched_name_writes_nothing() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        let path = Path::parse("Vehicle.Acceleration.*").unwrap();
        let values = json!([{"Vertical": 7}, {"Sideways": 2}]);

        let err = tree.set_signal(&channel, &path, &values).unwrap_err();
        assert!(matches!(err, CoreError::PathNotValid(_)));

        match tree
            .get_signal(&Path::parse("Vehicle.Acceleration.Vertical").unwrap())
            .unwrap()
        {
            SignalView::Leaf { value, .. } => assert_eq!(value, json!(NEVER_WRITTEN)),
            other => panic!("expected leaf view, got {other:?}"),
        }
    }

    #[test]
    fn test_wildcard_set_requires_array() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        let err = tree
            .set_signal(
                &channel,
                &Path::parse("Vehicle.Acceleration.*").unwrap(),
                &json!(5),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Generic(_)));
    }

    #[test]
    fn test_metadata_is_ancestor_wrapped_and_stripped() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        tree.set_signal(
            &channel,
            &Path::parse("Vehicle.Acceleration.Vertical").unwrap(),
            &json!(9),
        )
        .unwrap();

        let md = tree
            .get_metadata(&Path::parse("Vehicle.Acceleration").unwrap())
            .unwrap();
        let acceleration = &md["Vehicle"]["children"]["Acceleration"];
        assert_eq!(acceleration["uuid"], "ce0fb48b566354c7841e279125f6f66d");
        for name in ["Lateral", "Longitudinal", "Vertical"] {
            let child = &acceleration["children"][name];
            assert_eq!(child["datatype"], "int32");
            assert_eq!(child["type"], "sensor");
            assert_eq!(child["unit"], "m/s2");
        }
        // written value must never leak into metadata
        let rendered = md.to_string();
        assert!(!rendered.contains("\"value\""));
        assert!(!rendered.contains("\"timestamp\""));
    }

    #[test]
    fn test_metadata_unknown_path() {
        let tree = SignalTree::from_document(&test_document()).unwrap();
        assert!(matches!(
            tree.get_metadata(&Path::parse("Vehicle.Invalid.Path").unwrap()),
            Err(CoreError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_dump_metadata_round_trips_document() {
        let doc = test_document();
        let tree = SignalTree::from_document(&doc).unwrap();
        assert_eq!(tree.dump_metadata(), doc);
    }

    #[test]
    fn test_update_metadata_requires_modify_tree() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let mut channel = Channel::new(10_000_000);
        channel.authorize(i64::MAX, HashMap::new(), false);

        let err = tree
            .update_metadata(
                &channel,
                &Path::parse("Vehicle.Gear").unwrap(),
                &json!({"unit": "gear"}),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::NoPermission(_)));
    }

    #[test]
    fn test_update_metadata_merges_patch() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        let path = Path::parse("Vehicle.Acceleration.Vertical").unwrap();

        tree.update_metadata(&channel, &path, &json!({"datatype": "int64", "bla": "blu"}))
            .unwrap();

        let md = tree.get_metadata(&path).unwrap();
        let vertical = &md["Vehicle"]["children"]["Acceleration"]["children"]["Vertical"];
        assert_eq!(vertical["datatype"], "int64");
        assert_eq!(vertical["bla"], "blu");
        // uuid survives any patch
        assert_eq!(vertical["uuid"], "9521e8d36a9b546d9414a779f5dd9bef");
    }

    #[test]
    fn test_update_metadata_invalid_path() {
        let mut tree = SignalTree::from_document(&test_document()).unwrap();
        let channel = rw_channel(&tree);
        let err = tree
            .update_metadata(
                &channel,
                &Path::parse("Vehicle.Invalid.Path").unwrap(),
                &json!({}),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::PathNotValid(_)));
    }
}
