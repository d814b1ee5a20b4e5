pub mod cache;
pub mod cancellation;
pub mod compositor;
pub mod coordinator;
pub mod direct;
pub mod messages;
pub mod palette;
pub mod perturbation;
pub mod pipeline;
pub mod predictor;
pub mod prefetch;
pub mod reference_orbit;
pub mod reproject;
pub mod stats;
pub mod tile_render;
pub mod worker;

pub use cache::l3::{FsTileStore, MemoryTileStore, TileStore};
pub use cache::ThreeTierCache;
pub use compositor::Compositor;
pub use coordinator::{Coordinator, EngineState};
pub use palette::{Palette, PaletteScheme};
pub use perturbation::{iterate_delta, smooth_escape, PixelOutcome, INTERIOR};
pub use predictor::ViewportPredictor;
pub use reference_orbit::ReferenceOrbit;
pub use reproject::Reprojector;
pub use stats::EngineStats;
pub use worker::WorkerPool;
