pub mod fixtures;
pub mod mock_store;

#[allow(unused_imports)]
pub use fixtures::{pattern, write_archive};
#[allow(unused_imports)]
pub use mock_store::MockGlacier;
