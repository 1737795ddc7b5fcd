use tracing::{debug, trace};

use crate::ir::{Instruction, Operand};

/// Single forward pass of constant folding.
///
/// A `binop` whose operands are both integer literals becomes an `assign` of
/// the computed value. Nothing is propagated: a temporary that now holds a
/// constant is still read through its name by later instructions.
pub fn fold_constants(code: &[Instruction]) -> Vec<Instruction> {
    let mut folded = 0usize;
    let optimized: Vec<Instruction> = code
        .iter()
        .map(|instruction| match instruction {
            Instruction::BinOp {
                target,
                op,
                left,
                right,
            } => match (left.as_int(), right.as_int()) {
                (Some(left), Some(right)) => {
                    let value = op.apply(left, right);
                    trace!(%target, %op, left, right, value, "folded binop");
                    folded += 1;
                    Instruction::Assign {
                        target: target.clone(),
                        source: Operand::Int(value),
                    }
                }
                _ => instruction.clone(),
            },
            other => other.clone(),
        })
        .collect();

    debug!(folded, "constant folding finished");
    optimized
}
