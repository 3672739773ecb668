//! Serializing result trees.

use super::tree::{NodeId, ResultNode, ResultTree, ResultValue};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Which null entries are left out when a result tree is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullIgnoreCondition {
    /// Write every null.
    #[default]
    None,
    /// Skip null object fields.
    Fields,
    /// Skip null list items.
    Lists,
    /// Skip both.
    All,
}

impl NullIgnoreCondition {
    #[must_use]
    pub const fn ignores_fields(self) -> bool {
        matches!(self, Self::Fields | Self::All)
    }

    #[must_use]
    pub const fn ignores_lists(self) -> bool {
        matches!(self, Self::Lists | Self::All)
    }
}

impl ResultTree {
    /// A serializable view of the subtree rooted at `node`.
    #[must_use]
    pub fn serializable(&self, node: NodeId, condition: NullIgnoreCondition) -> SerializableNode<'_> {
        SerializableNode {
            tree: self,
            node,
            condition,
        }
    }

    /// Writes the subtree rooted at `node` into a JSON value.
    pub fn to_value(
        &self,
        node: NodeId,
        condition: NullIgnoreCondition,
    ) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.serializable(node, condition))
    }

    /// Writes an object subtree into a JSON map. Returns `None` when the
    /// node is invalidated or is not an object.
    pub fn to_map(
        &self,
        node: NodeId,
        condition: NullIgnoreCondition,
    ) -> Result<Option<Map<String, Value>>, serde_json::Error> {
        match self.to_value(node, condition)? {
            Value::Object(map) => Ok(Some(map)),
            _ => Ok(None),
        }
    }

    /// True if the value writes as null: an explicit null, or a node that
    /// is invalidated or no longer exists.
    fn writes_null(&self, value: &ResultValue) -> bool {
        match value {
            ResultValue::Null => true,
            ResultValue::Leaf(v) => v.is_null(),
            ResultValue::Node(id) => self.is_invalidated(*id).unwrap_or(true),
        }
    }
}

/// Serializes a result subtree. Created by [`ResultTree::serializable`].
#[derive(Debug, Clone, Copy)]
pub struct SerializableNode<'a> {
    tree: &'a ResultTree,
    node: NodeId,
    condition: NullIgnoreCondition,
}

impl Serialize for SerializableNode<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let tree = self.tree;
        if tree.writes_null(&ResultValue::Node(self.node)) {
            return serializer.serialize_none();
        }
        let Ok(node) = tree.get(self.node) else {
            return serializer.serialize_none();
        };

        match node {
            ResultNode::Object(object) => {
                let mut map = serializer.serialize_map(None)?;
                for field in object.fields() {
                    if self.condition.ignores_fields() && tree.writes_null(&field.value) {
                        continue;
                    }
                    map.serialize_entry(&field.name, &self.value(&field.value))?;
                }
                map.end()
            }
            ResultNode::List(list) => {
                let mut seq = serializer.serialize_seq(None)?;
                for item in list.items() {
                    if self.condition.ignores_lists() && tree.writes_null(item) {
                        continue;
                    }
                    seq.serialize_element(&self.value(item))?;
                }
                seq.end()
            }
        }
    }
}

impl<'a> SerializableNode<'a> {
    fn value(&self, value: &'a ResultValue) -> SerializableValue<'a> {
        SerializableValue {
            tree: self.tree,
            value,
            condition: self.condition,
        }
    }
}

struct SerializableValue<'a> {
    tree: &'a ResultTree,
    value: &'a ResultValue,
    condition: NullIgnoreCondition,
}

impl Serialize for SerializableValue<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.value {
            ResultValue::Null => serializer.serialize_none(),
            ResultValue::Leaf(value) => value.serialize(serializer),
            ResultValue::Node(id) => self.tree.serializable(*id, self.condition).serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> (ResultTree, NodeId) {
        let mut tree = ResultTree::new();
        let root = tree.rent_object(3);
        let tags = tree.rent_list(3);
        tree.set_field(root, 0, "id", json!("1"), false).unwrap();
        tree.set_field(root, 1, "nickname", Value::Null, true).unwrap();
        tree.set_field(root, 2, "tags", tags, true).unwrap();
        tree.push(tags, json!("a")).unwrap();
        tree.push(tags, Value::Null).unwrap();
        tree.push(tags, json!("b")).unwrap();
        (tree, root)
    }

    #[test]
    fn test_write_all_nulls() {
        let (tree, root) = sample();
        let value = tree.to_value(root, NullIgnoreCondition::None).unwrap();
        assert_eq!(
            value,
            json!({"id": "1", "nickname": null, "tags": ["a", null, "b"]})
        );
    }

    #[test]
    fn test_ignore_conditions() {
        let (tree, root) = sample();
        assert_eq!(
            tree.to_value(root, NullIgnoreCondition::Fields).unwrap(),
            json!({"id": "1", "tags": ["a", null, "b"]})
        );
        assert_eq!(
            tree.to_value(root, NullIgnoreCondition::Lists).unwrap(),
            json!({"id": "1", "nickname": null, "tags": ["a", "b"]})
        );
        assert_eq!(
            tree.to_value(root, NullIgnoreCondition::All).unwrap(),
            json!({"id": "1", "tags": ["a", "b"]})
        );
    }

    #[test]
    fn test_field_order_follows_slots() {
        let mut tree = ResultTree::new();
        let root = tree.rent_object(2);
        tree.set_field(root, 1, "second", json!(2), true).unwrap();
        tree.set_field(root, 0, "first", json!(1), true).unwrap();

        let map = tree.to_map(root, NullIgnoreCondition::None).unwrap().unwrap();
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["first", "second"]);
    }

    #[test]
    fn test_invalidated_nodes_are_skipped() {
        let (mut tree, root) = sample();
        let ResultNode::Object(object) = tree.get(root).unwrap() else {
            panic!("expected object");
        };
        let ResultValue::Node(tags) = object.field(2).unwrap().value else {
            panic!("expected node");
        };

        tree.invalidate(tags).unwrap();
        assert_eq!(
            tree.to_value(root, NullIgnoreCondition::None).unwrap(),
            json!({"id": "1", "nickname": null, "tags": null})
        );
        assert_eq!(
            tree.to_value(root, NullIgnoreCondition::Fields).unwrap(),
            json!({"id": "1"})
        );
    }

    #[test]
    fn test_invalidated_root_writes_null() {
        let (mut tree, root) = sample();
        tree.invalidate(root).unwrap();
        assert_eq!(tree.to_value(root, NullIgnoreCondition::None).unwrap(), Value::Null);
        assert_eq!(tree.to_map(root, NullIgnoreCondition::None).unwrap(), None);
    }
}
