//! Result data model: instances, the values they share, and the lists that
//! hold values under a result node.

pub mod instance;
pub mod list;
pub mod value;

pub use instance::{
    AttributeInstance, CaseDbInstance, CentralRepoInstance, DataSourceKey, DisplayLeaf, NodeKind,
};
pub use list::ValueAggregateList;
pub use value::AttributeValue;
