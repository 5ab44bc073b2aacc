//! Prometheus metrics for the storage core.
//!
//! One process-wide [`prometheus::Registry`], populated at first use through
//! `lazy_static`, the way every other process-wide collaborator in this
//! workspace is wired (no ad hoc statics scattered across crates).

#[macro_use]
extern crate lazy_static;

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Declares a metrics struct whose fields are registered into a shared
/// [`Registry`] on construction.
macro_rules! metrics_group {
    (
        $(#[$group_meta:meta])*
        pub struct $group:ident {
            $(
                #[name = $name:expr]
                #[help = $help:expr]
                $(#[labels($($label:ident),+ $(,)?)])?
                pub $field:ident: $ty:ty,
            )*
        }
    ) => {
        $(#[$group_meta])*
        pub struct $group {
            $(pub $field: $ty,)*
        }

        impl $group {
            fn new(registry: &Registry) -> Self {
                $(
                    let $field = metrics_group!(@build $ty, $name, $help $(, [$($label),+])?);
                    registry
                        .register(Box::new($field.clone()))
                        .expect(concat!("failed to register metric ", $name));
                )*
                Self { $($field,)* }
            }
        }
    };

    (@build IntCounter, $name:expr, $help:expr) => {
        IntCounter::new($name, $help).expect("valid metric opts")
    };
    (@build IntGauge, $name:expr, $help:expr) => {
        IntGauge::new($name, $help).expect("valid metric opts")
    };
    (@build IntCounterVec, $name:expr, $help:expr, [$($label:ident),+]) => {
        IntCounterVec::new(Opts::new($name, $help), &[$(stringify!($label)),+]).expect("valid metric opts")
    };
    (@build HistogramVec, $name:expr, $help:expr, [$($label:ident),+]) => {
        HistogramVec::new(Opts::new($name, $help).into(), &[$(stringify!($label)),+]).expect("valid metric opts")
    };
}

metrics_group! {
    /// Storage-core metrics, scoped to a single conglomerate process.
    pub struct StorageMetrics {
        #[name = "rdbcore_commits_total"]
        #[help = "Transactions successfully committed"]
        pub commits_total: IntCounter,

        #[name = "rdbcore_rollbacks_total"]
        #[help = "Transactions rolled back, explicitly or on error"]
        pub rollbacks_total: IntCounter,

        #[name = "rdbcore_row_remove_clash_total"]
        #[help = "Commits rejected because a concurrently committed transaction removed the same row"]
        pub row_remove_clash_total: IntCounter,

        #[name = "rdbcore_constraint_violation_total"]
        #[help = "Constraint violations raised, by constraint kind"]
        #[labels(kind)]
        pub constraint_violation_total: IntCounterVec,

        #[name = "rdbcore_open_transactions"]
        #[help = "Transactions currently open against the conglomerate"]
        pub open_transactions: IntGauge,
    }
}

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    pub static ref METRICS: StorageMetrics = StorageMetrics::new(&REGISTRY);
}

/// Returns the process-wide registry so a server binary can expose it over
/// `/metrics`.
pub fn registry() -> &'static Registry {
    &REGISTRY
}
