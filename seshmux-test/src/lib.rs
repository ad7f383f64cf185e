//! Test suite and utilities for `seshmux`.
//!
//! # Usage
//!
//! Add `seshmux-test` to your `dev-dependencies`, then run the blob-store
//! contract suite against a [`StateStore`][state-store] implementation with
//! the [`test_suite!`] macro:
//!
//! ```ignore
//! use seshmux_test::test_suite;
//!
//! test_suite! {
//!     store: MyStore::new(),
//! }
//! ```
//!
//! The expression following `store:` initializes the store in the body of
//! each generated `#[tokio::test]`. With `guard: <ident> = <expr>`, a
//! resource is created before the store and dropped when the test ends, so
//! stores needing a scratch directory can do:
//!
//! ```ignore
//! test_suite! {
//!     guard: dir = tempfile::tempdir().unwrap(),
//!     store: FsStore::open(dir.path()).unwrap(),
//! }
//! ```
//!
//! [state-store]: seshmux_core::StateStore
//!
//! The [`support`] module holds the scriptable [`MockHost`] and engine
//! fixtures used by the end-to-end scenario tests in this crate's `tests/`
//! directory.
//!
//! [`MockHost`]: support::MockHost

pub mod support;

pub mod suite;
pub use suite::*;

#[doc(hidden)]
pub mod __private {
    pub use paste;
}

// To add a test, write a `test_<name>` function in `suite::store` taking a
// single `impl StateStore` argument and returning a future, then add `<name>`
// to the list below.
#[macro_export]
macro_rules! test_suite {
    (guard: $guard_ident:ident = $guard:expr, store: $store:expr $(,)?) => {
        $crate::__test_suite_expand! {
            (guard: $guard_ident = $guard, store: $store) => {
                smoke
                persist_then_load_round_trip
                load_missing_returns_none
                overwrite_replaces_blob
                layers_are_independent
                blobs_are_independent
                sync_layer_rejects_oversized_entries
                clear_is_scoped_to_layer
            }
        }
    };
    (guard: $guard:expr, store: $store:expr $(,)?) => {
        $crate::test_suite! {
            guard: __guard = $guard,
            store: $store,
        }
    };
    (store: $store:expr $(,)?) => {
        $crate::test_suite! {
            guard: (),
            store: $store,
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __test_suite_expand {
    ((guard: $guard_ident:ident = $guard:expr, store: $store:expr) => { $($name:ident)* }) => {
        $crate::__private::paste::paste! {
            $(
                #[tokio::test]
                async fn $name() {
                    let $guard_ident = $guard;
                    let _ = &$guard_ident;
                    let store = $store;
                    $crate::suite::[<test_ $name>](store).await;
                }
            )*
        }
    };
}
