//! Rewrites over an encoded unit, then finalization into a [`Runnable`].
//!
//! Every pass preserves the stack discipline the generator established.
//! Passes run in a fixed order; each reports whether it changed anything.

mod dce;
mod finalize;
mod inline;
mod literal;
mod returns;
mod tail;

use tracing::debug;

use crate::encoder::Encoded;
use crate::error::CompileError;
use crate::options::Options;
use crate::vm::Runnable;

pub fn optimize(mut unit: Encoded, options: &Options) -> Result<Runnable, CompileError> {
    if options.optimize {
        let name = unit.name.as_ref().map_or("<anonymous>", |s| s.as_str()).to_string();
        let before = unit.code.len();
        let mut ran = Vec::new();
        if returns::split_returns(&mut unit) {
            ran.push("returns");
        }
        if tail::convert_tail_calls(&mut unit) {
            ran.push("tail");
        }
        if options.inlining() && inline::inline_calls(&mut unit, options)? {
            ran.push("inline");
        }
        if dce::eliminate(&mut unit) {
            ran.push("dce");
        }
        if literal::fold_literal_returns(&mut unit) {
            ran.push("literal");
        }
        if !ran.is_empty() {
            debug!(
                target: "kiln::optimize",
                unit = %name,
                passes = ?ran,
                before,
                after = unit.code.len(),
                "optimized unit"
            );
        }
    }
    finalize::finalize(unit)
}
