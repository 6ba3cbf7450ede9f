pub mod error;
pub mod codec;
pub mod tag_scan;
pub mod chunk;
pub mod region;
pub mod protection;
pub mod forceload;
pub mod task;
pub mod world;
pub mod state;

pub use error::{PeelError, Result};
pub use chunk::Chunk;
pub use region::{read_region, write_region, write_region_to, Region};
pub use protection::ProtectionIndex;
pub use forceload::{load_forced_chunks, ForcedLoadResult, LedgerLayout};
pub use task::{PeelResult, RunParams, TaskDispatcher};
pub use world::{peel_world, PeelOptions};
