pub mod media_item;
pub mod photo_index;

pub use media_item::*;
pub use photo_index::*;
