//! Asset catalog, decoding and the load-time pose table.
//!
//! Everything here runs before the first frame: the catalog is read, every image is decoded into
//! premultiplied RGBA8 under a per-file timeout, and pose images are arranged into a flat table
//! keyed by `(Character, PoseSlot, MouthState)`. The resulting [`AssetCache`] is immutable.

/// Catalog JSON model.
pub mod catalog;
/// Image/SVG decoding into premultiplied pixmaps.
pub mod decode;
/// Pose table, asset cache and per-job visual set.
pub mod store;

pub use catalog::{AssetCatalog, CharacterPoses, PoseEntry, PoseView};
pub use decode::PreparedImage;
pub use store::{AssetCache, FrameAssets, LoadOptions, PoseSlot, PoseTable};
