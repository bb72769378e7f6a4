//! Load/store forwarding.
//!
//! When a store is immediately followed by a load of the same address and
//! width, the loaded value is taken straight from the stored source,
//! avoiding the memory round trip. Only adjacent pairs are considered;
//! anything in between invalidates the match.

use super::{MicroPass, PassCtx};
use crate::micro::{MicroOpcode, MicroOperand};

pub struct LoadStoreForwardPass;

impl MicroPass for LoadStoreForwardPass {
    fn name(&self) -> &'static str {
        "load-store-forward"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let mut changed = false;
        let mut cursor = ctx.insts.first();
        while let Some(first_ref) = cursor {
            cursor = ctx.insts.next(first_ref);
            let Some(second_ref) = ctx.insts.next(first_ref) else {
                break;
            };
            let first = *ctx.insts.at(first_ref);
            let second = *ctx.insts.at(second_ref);
            if second.op != MicroOpcode::LoadRegMem {
                continue;
            }
            let (load_mem, load_bits, load_off) = {
                let ops = ctx.operands.ops(&second);
                (ops[1].reg(), ops[2].bits(), ops[3].u64())
            };

            match first.op {
                MicroOpcode::LoadMemReg => {
                    let (store_mem, store_src, store_bits, store_off) = {
                        let ops = ctx.operands.ops(&first);
                        (ops[0].reg(), ops[1].reg(), ops[2].bits(), ops[3].u64())
                    };
                    if store_mem == load_mem && store_off == load_off && store_bits == load_bits {
                        let mut rewritten = second;
                        rewritten.op = MicroOpcode::LoadRegReg;
                        rewritten.num_ops = 3;
                        *ctx.insts.at_mut(second_ref) = rewritten;
                        let ops = ctx.operands.ops_mut(&rewritten);
                        ops[1] = MicroOperand::Reg(store_src);
                        ops[2] = MicroOperand::Bits(store_bits);
                        changed = true;
                    }
                }
                MicroOpcode::LoadMemImm => {
                    let (store_mem, store_bits, store_off, store_value) = {
                        let ops = ctx.operands.ops(&first);
                        (ops[0].reg(), ops[1].bits(), ops[2].u64(), ops[3].u64())
                    };
                    if store_mem == load_mem && store_off == load_off && store_bits == load_bits {
                        let mut rewritten = second;
                        rewritten.op = MicroOpcode::LoadRegImm;
                        rewritten.num_ops = 3;
                        *ctx.insts.at_mut(second_ref) = rewritten;
                        let ops = ctx.operands.ops_mut(&rewritten);
                        ops[1] = MicroOperand::Bits(store_bits);
                        ops[2] = MicroOperand::U64(store_value);
                        changed = true;
                    }
                }
                _ => {}
            }
        }
        changed
    }
}
