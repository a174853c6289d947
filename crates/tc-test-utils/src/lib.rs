//! # Token Cache Test Utilities
//!
//! Shared mocks and fixtures for testing the token cache and the refresh
//! daemon without a real identity provider.
//!
//! ## Modules
//!
//! - `mock_client` - Scripted confidential client and factory
//! - `counting_store` - Byte store that counts calls and can be made to fail
//! - `fixtures` - Accounts, activities and seeded cache blobs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = Arc::new(CountingByteStore::new());
//!     seed_store(store.as_ref(), "alice-key", "alice").await;
//!
//!     let clients = MockClientFactory::new()
//!         .with_outcome("bob", MockOutcome::InteractionRequired);
//!
//!     // Build a runner over `store` and `clients`...
//! }
//! ```

pub mod counting_store;
pub mod fixtures;
pub mod mock_client;

pub use counting_store::*;
pub use fixtures::*;
pub use mock_client::*;
