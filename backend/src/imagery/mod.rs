//! Imagery building blocks: spectral indices, cloud masking, collection
//! filters, composites and the band-math expression tree.

pub mod cloud_mask;
pub mod collection;
pub mod composite;
pub mod expr;
pub mod indices;

pub use collection::{Collection, CollectionQuery, SortOrder};
pub use composite::{CompositeBuilder, CompositeMethod, CompositeSpec};
pub use expr::{BinaryOp, ImageExpr, Pixel, PixelSource};
pub use indices::{derive_indices, normalized_difference, SpectralIndex};
