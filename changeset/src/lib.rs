//! The embedded change-capture and change-application engine: a
//! pre-update recorder, a binary changeset codec, and a replay driver
//! with pluggable conflict resolution, plus a structural fuzzer for
//! differential testing of changeset consumers.

mod applier;
mod change;
mod concat;
mod encoder;
mod engine;
mod fuzz;
mod hashtable;
mod inverter;
mod iterator;
mod op;
mod session;
mod table;
mod value;

pub use applier::{apply, ConflictAction, ConflictKind};
pub use concat::concat;
pub use engine::{Catalog, HostConnection, PreUpdateSource, PreparedStatement, StepResult};
pub use fuzz::{dump, generate_variant, generate_variants};
pub use inverter::invert;
pub use iterator::{ChangesetIter, IterOutcome};
pub use op::Op;
pub use session::{Session, SessionRegistry};
pub use table::TableDescriptor;
pub use value::Value;
