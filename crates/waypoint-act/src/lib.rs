//! The Abstract Coverage Tree (ACT) and its learned branch conditions.
//!
//! The ACT is a radix tree over the significant prefixes of observed
//! execution paths. Each edge carries a branch condition over the input
//! parameters, learned against the node's siblings and refined by an
//! external synthesizer; the engine uses those conditions to steer input
//! generation toward unexplored paths.

pub mod condition;
pub mod tree;

pub use condition::{
    Condition, ConfusionMatrix, Predicate, SynthCtx, SynthesisOutcome, SynthesisStatus,
};
pub use tree::{ExecTree, NodeId};
pub use waypoint_core::signature::CondKind;
