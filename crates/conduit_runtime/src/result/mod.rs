//! Result model: the mutable result tree, the builder and the frozen
//! operation result.

mod builder;
mod operation_result;
mod tree;
mod write;

pub use builder::{BuilderError, OperationResultBuilder};
pub use operation_result::{CleanupHook, DataMap, OperationResult};
pub use tree::{
    ListResult, NodeId, ObjectField, ObjectResult, ResultError, ResultNode, ResultNodeSlot,
    ResultTree, ResultValue,
};
pub use write::{NullIgnoreCondition, SerializableNode};
