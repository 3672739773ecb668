//! The mutable result buffer an operation writes into.
//!
//! Nodes live in a generational [`Arena`] owned by the operation context.
//! Parent links are handles, not ownership edges, so a pooled context can
//! drop the whole tree in one `clear()` and any handle kept past that point
//! is rejected instead of resolving to a newer node.

use conduit_core::{Arena, Id, Path};
use serde_json::Value;
use thiserror::Error;

/// Handle to a node in a [`ResultTree`].
pub type NodeId = Id<ResultNodeSlot>;

/// Errors raised while linking or writing result nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultError {
    /// The handle is unknown or belongs to a cleared generation.
    #[error("result node {0:?} does not exist in this result tree")]
    UnknownNode(NodeId),

    /// A node was attached to itself.
    #[error("a result node cannot be its own parent")]
    SelfParent,

    /// The slot index is outside the parent's slot range.
    #[error("index {index} is out of range for a node with {len} slots")]
    IndexOutOfRange { index: usize, len: usize },

    /// The node already has a parent.
    #[error("result node {0:?} is already attached to a parent")]
    AlreadyAttached(NodeId),

    /// An object operation was applied to a list node.
    #[error("result node {0:?} is not an object")]
    NotAnObject(NodeId),

    /// A list operation was applied to an object node.
    #[error("result node {0:?} is not a list")]
    NotAList(NodeId),

    /// The node is already an ancestor of the prospective parent.
    #[error("linking result node {0:?} would create a cycle")]
    Cycle(NodeId),

    /// Null was written into an object slot that has no field yet.
    #[error("object slot {index} has no field to null")]
    UnwrittenSlot { index: usize },
}

/// The value stored in an object field or list item.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    /// An explicit null.
    Null,
    /// A leaf (scalar or pre-built) JSON value.
    Leaf(Value),
    /// A nested object or list node.
    Node(NodeId),
}

impl From<Value> for ResultValue {
    fn from(value: Value) -> Self {
        if value.is_null() {
            Self::Null
        } else {
            Self::Leaf(value)
        }
    }
}

impl From<NodeId> for ResultValue {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

/// A field written into an object node.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    pub name: String,
    pub value: ResultValue,
    pub nullable: bool,
}

/// An object node with a fixed number of field slots.
#[derive(Debug, Clone, Default)]
pub struct ObjectResult {
    fields: Vec<Option<ObjectField>>,
}

impl ObjectResult {
    /// Number of field slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.fields.len()
    }

    /// The field written at `index`, if any.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&ObjectField> {
        self.fields.get(index).and_then(Option::as_ref)
    }

    /// All written fields in slot order.
    pub fn fields(&self) -> impl Iterator<Item = &ObjectField> {
        self.fields.iter().flatten()
    }
}

/// A list node.
#[derive(Debug, Clone)]
pub struct ListResult {
    items: Vec<ResultValue>,
    capacity: usize,
    nullable_items: bool,
}

impl ListResult {
    /// Number of items written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if no item was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in order.
    #[must_use]
    pub fn items(&self) -> &[ResultValue] {
        &self.items
    }

    /// Whether items may be null.
    #[must_use]
    pub fn nullable_items(&self) -> bool {
        self.nullable_items
    }

    fn slot_len(&self) -> usize {
        self.capacity.max(self.items.len())
    }
}

/// The payload of a result node.
#[derive(Debug, Clone)]
pub enum ResultNode {
    Object(ObjectResult),
    List(ListResult),
}

/// A node together with its tree metadata.
#[derive(Debug, Clone)]
pub struct ResultNodeSlot {
    node: ResultNode,
    parent: Option<NodeId>,
    parent_index: usize,
    invalidated: bool,
    patch_id: u32,
    patch_path: Option<Path>,
}

impl ResultNodeSlot {
    fn new(node: ResultNode) -> Self {
        Self {
            node,
            parent: None,
            parent_index: 0,
            invalidated: false,
            patch_id: 0,
            patch_path: None,
        }
    }

    /// The node payload.
    #[must_use]
    pub fn node(&self) -> &ResultNode {
        &self.node
    }

    fn slot_len(&self) -> usize {
        match &self.node {
            ResultNode::Object(object) => object.capacity(),
            ResultNode::List(list) => list.slot_len(),
        }
    }
}

/// Arena of result nodes for one operation.
#[derive(Debug, Default)]
pub struct ResultTree {
    nodes: Arena<ResultNodeSlot>,
}

impl ResultTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an object node with `capacity` field slots.
    pub fn rent_object(&mut self, capacity: usize) -> NodeId {
        let object = ObjectResult {
            fields: vec![None; capacity],
        };
        self.nodes.alloc(ResultNodeSlot::new(ResultNode::Object(object)))
    }

    /// Allocates a list node sized for `capacity` items. Items are nullable
    /// until [`ResultTree::set_items_nullable`] says otherwise.
    pub fn rent_list(&mut self, capacity: usize) -> NodeId {
        let list = ListResult {
            items: Vec::with_capacity(capacity),
            capacity,
            nullable_items: true,
        };
        self.nodes.alloc(ResultNodeSlot::new(ResultNode::List(list)))
    }

    /// Returns true if the handle resolves in the current generation.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(node)
    }

    /// Number of allocated nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a node's payload.
    pub fn get(&self, node: NodeId) -> Result<&ResultNode, ResultError> {
        self.slot(node).map(ResultNodeSlot::node)
    }

    fn slot(&self, node: NodeId) -> Result<&ResultNodeSlot, ResultError> {
        self.nodes.get(node).ok_or(ResultError::UnknownNode(node))
    }

    fn slot_mut(&mut self, node: NodeId) -> Result<&mut ResultNodeSlot, ResultError> {
        self.nodes.get_mut(node).ok_or(ResultError::UnknownNode(node))
    }

    /// Links `child` into slot `index` of `parent`.
    ///
    /// A node is attached at most once.
    pub fn set_parent(
        &mut self,
        child: NodeId,
        parent: NodeId,
        index: usize,
    ) -> Result<(), ResultError> {
        if child == parent {
            return Err(ResultError::SelfParent);
        }
        let len = self.slot(parent)?.slot_len();
        if index >= len {
            return Err(ResultError::IndexOutOfRange { index, len });
        }
        self.link(child, parent, index)
    }

    fn link(&mut self, child: NodeId, parent: NodeId, index: usize) -> Result<(), ResultError> {
        if child == parent {
            return Err(ResultError::SelfParent);
        }
        if self.slot(child)?.parent.is_some() {
            return Err(ResultError::AlreadyAttached(child));
        }
        let mut ancestor = Some(parent);
        while let Some(node) = ancestor {
            if node == child {
                return Err(ResultError::Cycle(child));
            }
            ancestor = self.slot(node)?.parent;
        }
        let slot = self.slot_mut(child)?;
        slot.parent = Some(parent);
        slot.parent_index = index;
        Ok(())
    }

    /// Unlinks and invalidates a node that was overwritten in its parent.
    fn detach(&mut self, replaced: Option<ResultValue>, keep: &ResultValue) -> Result<(), ResultError> {
        let Some(ResultValue::Node(old)) = replaced else {
            return Ok(());
        };
        if matches!(keep, ResultValue::Node(new) if *new == old) {
            return Ok(());
        }
        let slot = self.slot_mut(old)?;
        slot.parent = None;
        slot.parent_index = 0;
        slot.invalidated = true;
        Ok(())
    }

    /// Parent handle of a node, `None` for a root.
    pub fn parent(&self, node: NodeId) -> Result<Option<NodeId>, ResultError> {
        Ok(self.slot(node)?.parent)
    }

    /// Slot index of a node within its parent.
    pub fn parent_index(&self, node: NodeId) -> Result<usize, ResultError> {
        Ok(self.slot(node)?.parent_index)
    }

    /// Writes a field into an object slot. Node values are linked to the
    /// object as part of the write; a node that previously filled the slot
    /// is detached.
    pub fn set_field(
        &mut self,
        object: NodeId,
        index: usize,
        name: impl Into<String>,
        value: impl Into<ResultValue>,
        nullable: bool,
    ) -> Result<(), ResultError> {
        let value = value.into();
        let (len, previous) = match self.get(object)? {
            ResultNode::Object(o) => (o.capacity(), o.field(index).map(|f| f.value.clone())),
            ResultNode::List(_) => return Err(ResultError::NotAnObject(object)),
        };
        if index >= len {
            return Err(ResultError::IndexOutOfRange { index, len });
        }
        if let ResultValue::Node(child) = value {
            if previous.as_ref() != Some(&value) {
                self.link(child, object, index)?;
            }
        }
        self.detach(previous, &value)?;
        if let ResultNode::Object(o) = &mut self.slot_mut(object)?.node {
            o.fields[index] = Some(ObjectField {
                name: name.into(),
                value,
                nullable,
            });
        }
        Ok(())
    }

    /// Appends an item to a list.
    pub fn push(&mut self, list: NodeId, value: impl Into<ResultValue>) -> Result<(), ResultError> {
        let value = value.into();
        let index = match self.get(list)? {
            ResultNode::List(l) => l.len(),
            ResultNode::Object(_) => return Err(ResultError::NotAList(list)),
        };
        if let ResultValue::Node(child) = value {
            self.link(child, list, index)?;
        }
        if let ResultNode::List(l) = &mut self.slot_mut(list)?.node {
            l.items.push(value);
        }
        Ok(())
    }

    /// Overwrites an item that was already pushed.
    pub fn set_item(
        &mut self,
        list: NodeId,
        index: usize,
        value: impl Into<ResultValue>,
    ) -> Result<(), ResultError> {
        let value = value.into();
        let (len, previous) = match self.get(list)? {
            ResultNode::List(l) => (l.len(), l.items.get(index).cloned()),
            ResultNode::Object(_) => return Err(ResultError::NotAList(list)),
        };
        if index >= len {
            return Err(ResultError::IndexOutOfRange { index, len });
        }
        if let ResultValue::Node(child) = value {
            if previous.as_ref() != Some(&value) {
                self.link(child, list, index)?;
            }
        }
        self.detach(previous, &value)?;
        if let ResultNode::List(l) = &mut self.slot_mut(list)?.node {
            l.items[index] = value;
        }
        Ok(())
    }

    /// Declares whether list items may be null.
    pub fn set_items_nullable(&mut self, list: NodeId, nullable: bool) -> Result<(), ResultError> {
        match &mut self.slot_mut(list)?.node {
            ResultNode::List(l) => {
                l.nullable_items = nullable;
                Ok(())
            }
            ResultNode::Object(_) => Err(ResultError::NotAList(list)),
        }
    }

    /// Replaces whatever is in slot `index` of `parent` with null.
    ///
    /// An object slot that was never written has no field name to carry the
    /// null and is rejected with [`ResultError::UnwrittenSlot`].
    pub fn set_slot_null(&mut self, parent: NodeId, index: usize) -> Result<(), ResultError> {
        let slot = self.slot_mut(parent)?;
        let len = slot.slot_len();
        match &mut slot.node {
            ResultNode::Object(o) => match o.fields.get_mut(index) {
                Some(Some(field)) => field.value = ResultValue::Null,
                Some(None) => return Err(ResultError::UnwrittenSlot { index }),
                None => return Err(ResultError::IndexOutOfRange { index, len }),
            },
            ResultNode::List(l) => match l.items.get_mut(index) {
                Some(item) => *item = ResultValue::Null,
                None => return Err(ResultError::IndexOutOfRange { index, len }),
            },
        }
        Ok(())
    }

    /// Whether slot `index` of `parent` may hold null. Unwritten object
    /// slots count as nullable; nulling one still fails in
    /// [`set_slot_null`](Self::set_slot_null).
    pub fn is_slot_nullable(&self, parent: NodeId, index: usize) -> Result<bool, ResultError> {
        Ok(match self.get(parent)? {
            ResultNode::Object(o) => o.field(index).map_or(true, |f| f.nullable),
            ResultNode::List(l) => l.nullable_items,
        })
    }

    /// Marks a node invalidated. Invalidation never reverts.
    pub fn invalidate(&mut self, node: NodeId) -> Result<(), ResultError> {
        self.slot_mut(node)?.invalidated = true;
        Ok(())
    }

    pub fn is_invalidated(&self, node: NodeId) -> Result<bool, ResultError> {
        Ok(self.slot(node)?.invalidated)
    }

    /// Invalidates `node` and then its ancestors until a nullable slot
    /// absorbs the null.
    ///
    /// Returns the ancestor that now holds the null, or `None` when the
    /// invalidation reached a root.
    pub fn propagate_null(&mut self, node: NodeId) -> Result<Option<NodeId>, ResultError> {
        let mut current = node;
        loop {
            self.invalidate(current)?;
            let slot = self.slot(current)?;
            let Some(parent) = slot.parent else {
                return Ok(None);
            };
            let index = slot.parent_index;
            if self.is_slot_nullable(parent, index)? {
                self.set_slot_null(parent, index)?;
                return Ok(Some(parent));
            }
            current = parent;
        }
    }

    /// Tags a node as the root of an incremental patch.
    pub fn set_patch(&mut self, node: NodeId, id: u32, path: Path) -> Result<(), ResultError> {
        let slot = self.slot_mut(node)?;
        slot.patch_id = id;
        slot.patch_path = Some(path);
        Ok(())
    }

    /// Patch id of a node, 0 when untracked.
    pub fn patch_id(&self, node: NodeId) -> Result<u32, ResultError> {
        Ok(self.slot(node)?.patch_id)
    }

    pub fn patch_path(&self, node: NodeId) -> Result<Option<&Path>, ResultError> {
        Ok(self.slot(node)?.patch_path.as_ref())
    }

    /// Drops every node. Handles from before the call stop resolving.
    pub fn clear(&mut self) {
        self.nodes.reset();
    }
}
