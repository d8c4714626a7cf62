//! Model catalog, loader capability and warm pool.

mod catalog;
mod loader;
mod warm_pool;

pub use catalog::{ModelCatalog, ModelProfile};
pub use loader::{LoadError, LoadedHandle, ModelLoader};
pub use warm_pool::{WarmPool, WarmPoolMetrics};
