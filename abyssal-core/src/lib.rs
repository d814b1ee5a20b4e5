pub mod bigfixed;
pub mod config;
pub mod dd;
pub mod error;
pub mod precision;
pub mod tile;
pub mod viewport;

pub use bigfixed::BigFixed;
pub use config::EngineConfig;
pub use dd::{DdComplex, DoubleDouble};
pub use error::EngineError;
pub use precision::{
    limbs_for_scale, suggested_max_iter, tier_for_scale, PrecisionSelector, Tier, TierThresholds,
    MIN_SCALE,
};
pub use tile::{
    level_for_scale, visible_coords, visible_coords_rect, Tile, TileCoord, TileKey, TileStatus,
    MAX_LEVEL,
};
pub use viewport::Viewport;
