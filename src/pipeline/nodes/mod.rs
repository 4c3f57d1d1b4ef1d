//! Built-in pipeline node implementations.

pub mod buffer;
pub mod filter;
pub mod map;
pub mod pull;
pub mod reverse;
pub mod sink;
pub mod source;

pub use buffer::Buffer;
pub use filter::{filter, reject, FilterNode};
pub use map::{map, try_map};
pub use pull::{pull_collect, pull_from_iter, pull_map};
pub use reverse::reverse;
pub use sink::{collect, for_each, null_sink, Collected};
pub use source::{from_iter, generate};
