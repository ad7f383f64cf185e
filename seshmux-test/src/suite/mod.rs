pub mod store;
pub use store::*;

use seshmux_core::StateStore;

pub async fn test_smoke(_store: impl StateStore) {}
