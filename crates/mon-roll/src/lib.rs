//! Schema-driven registration and JSON/XML rendering of counter sets, plus
//! the g-stream sink those rollups (and `oss-core`'s per-call statistics)
//! are pushed through.

mod gstream;
mod item;
mod roll;
mod tree;

pub use gstream::{ChannelGStream, GStream, NullGStream};
pub use item::{Counter, Item, Schema, TextSource};
pub use roll::{Error, MonRoll, SetKind};
pub use tree::Tree;
