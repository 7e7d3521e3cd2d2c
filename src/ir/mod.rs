//! The builder IR (spec §4.5 / component E): a doubly-linked node list with
//! an editable cursor.

pub mod cursor;
pub mod node;

pub use cursor::{with_cursor_at, Cursor, CursorPosition};
pub use node::{FuncSignature, Node, NodeId, NodeList};
