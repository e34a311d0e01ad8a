//! Graph data model.
//!
//! Nodes and edges are plain values addressed by stable ids. Adjacency lives
//! in the store as id lists, never as references between values.

pub mod edge;
pub mod node;

pub use edge::{Edge, EdgeId};
pub use node::{EntityType, Node, NodeId};
