mod set;
mod unit;
mod variable;
mod writer;

pub use set::{PatchSet, PatchSetBuilder};
pub(crate) use set::{aggregate_errors, symbols_for};
pub use unit::{PatchUnit, UnitSource};
pub use variable::{Operator, Variable, VariableLocation, VariableReference};
pub use writer::write_patches_xml;
