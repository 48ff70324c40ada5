// Broker subscription lifecycle: reference-counted interest per topic and the
// periodic sweep that reclaims topics nobody needs anymore.

pub use controller::{SubscriptionController, SubscriptionEntry};
pub use sweeper::{run_sweeper, SweepConfig};

mod controller;
mod sweeper;
