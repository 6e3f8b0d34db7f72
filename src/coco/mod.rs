/*!
 * Coco Module
 * The concurrency coordinator: node arena and arbitration table
 */

pub mod arena;
pub mod table;

pub use arena::{CocoNode, NodeArena, NIL};
pub use table::CocoTable;
