//! Register allocation.
//!
//! Linear scan over live intervals computed in one pass. Virtual registers
//! take physical registers from the convention's free list, honoring their
//! class; when the list runs dry, the active interval with the latest end
//! is spilled to a stack slot and its occurrences shuttle through reserved
//! scratch registers, reloading before each use and storing after each
//! def. After this pass no virtual register remains.

use super::{MicroPass, PassCtx};
use crate::entities::InstRef;
use crate::micro::{
    collect_use_def, for_each_reg_operand, EmitFlags, MicroInst, MicroOpcode, MicroOperand,
    MicroReg, OpBits, RegClass, RegUse,
};
use crate::storage::{InstStore, OperandStore};
use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[derive(Clone, Copy, Debug)]
struct Interval {
    reg: MicroReg,
    start: u32,
    end: u32,
}

#[derive(Clone, Copy, Debug)]
enum Assignment {
    Phys(MicroReg),
    Spill(u32),
}

#[derive(Clone, Copy)]
struct Active {
    packed: u32,
    end: u32,
    phys: MicroReg,
    class: RegClass,
}

fn mem_inst(
    operands: &mut OperandStore,
    op: MicroOpcode,
    a: MicroOperand,
    b: MicroOperand,
    c: MicroOperand,
    d: MicroOperand,
) -> MicroInst {
    let ops = operands.alloc(&[a, b, c, d]);
    MicroInst {
        op,
        flags: EmitFlags::ZERO,
        num_ops: 4,
        ops,
    }
}

pub struct RegAllocPass;

impl MicroPass for RegAllocPass {
    fn name(&self) -> &'static str {
        "regalloc"
    }

    fn run(&mut self, ctx: &mut PassCtx) -> bool {
        let conv = ctx.call_conv.get();
        let (shuttle_a, shuttle_b) = conv
            .try_pick_int_scratch_regs()
            .expect("supported conventions always have scratch registers");
        let float_shuttle = *conv
            .scratch_float
            .last()
            .expect("conventions provide float scratch registers");

        let sequence = ctx.insts.sequence();

        // One pass over the stream: live intervals for virtual registers,
        // and the set of physical registers the function touches.
        let mut intervals: FxHashMap<u32, Interval> = FxHashMap::default();
        let mut order: Vec<u32> = Vec::new();
        let mut referenced_phys: FxHashSet<u32> = FxHashSet::default();
        for (position, &inst_ref) in sequence.iter().enumerate() {
            let position = position as u32;
            let inst = *ctx.insts.at(inst_ref);
            let use_def = collect_use_def(&inst, ctx.operands.ops(&inst), Some(&*ctx.encoder));
            for reg in use_def.uses.iter().chain(use_def.defs.iter()) {
                if reg.is_virtual() {
                    intervals
                        .entry(reg.packed())
                        .and_modify(|iv| iv.end = position)
                        .or_insert_with(|| {
                            order.push(reg.packed());
                            Interval {
                                reg: *reg,
                                start: position,
                                end: position,
                            }
                        });
                } else if reg.is_int() || reg.is_float() {
                    referenced_phys.insert(reg.packed());
                }
            }
        }

        if intervals.is_empty() {
            self.collect_frame_facts(ctx, &sequence, 0);
            return false;
        }

        // Free lists, reversed so pop() hands registers out in declaration
        // order. Anything the function already touches stays out.
        let mut free_int: Vec<MicroReg> = conv
            .callee_saved_int
            .iter()
            .copied()
            .filter(|reg| !referenced_phys.contains(&reg.packed()))
            .rev()
            .collect();
        let mut free_float: Vec<MicroReg> = conv
            .scratch_float
            .iter()
            .copied()
            .filter(|reg| *reg != float_shuttle && !referenced_phys.contains(&reg.packed()))
            .rev()
            .collect();

        let mut sorted: Vec<Interval> = order.iter().map(|packed| intervals[packed]).collect();
        sorted.sort_by_key(|iv| (iv.start, iv.reg.packed()));

        let mut assignment: FxHashMap<u32, Assignment> = FxHashMap::default();
        let mut active: Vec<Active> = Vec::new();
        let mut num_spill_slots: u32 = 0;
        let mut alloc_spill_slot = || {
            let slot = num_spill_slots;
            num_spill_slots += 1;
            slot
        };

        for interval in &sorted {
            let class = interval.reg.class();
            // Expire intervals that ended before this one starts.
            active.retain(|a| {
                if a.end < interval.start {
                    match a.class {
                        RegClass::Float => free_float.push(a.phys),
                        _ => free_int.push(a.phys),
                    }
                    false
                } else {
                    true
                }
            });

            let free = match class {
                RegClass::Float => &mut free_float,
                _ => &mut free_int,
            };
            if let Some(phys) = free.pop() {
                assignment.insert(interval.reg.packed(), Assignment::Phys(phys));
                active.push(Active {
                    packed: interval.reg.packed(),
                    end: interval.end,
                    phys,
                    class,
                });
                trace!("assign {:?} -> {:?}", interval.reg, phys);
                continue;
            }

            // No free register: evict the active interval that stays live
            // the longest and hand its register over.
            let victim = active
                .iter()
                .enumerate()
                .filter(|(_, a)| a.class == class)
                .max_by_key(|(_, a)| a.end)
                .map(|(i, _)| i);
            match victim {
                Some(index) => {
                    let victim = active[index];
                    let slot = alloc_spill_slot();
                    assignment.insert(victim.packed, Assignment::Spill(slot));
                    assignment.insert(interval.reg.packed(), Assignment::Phys(victim.phys));
                    active[index] = Active {
                        packed: interval.reg.packed(),
                        end: interval.end,
                        phys: victim.phys,
                        class,
                    };
                    trace!("spill {:#x} to slot {slot}, reassign {:?}", victim.packed, victim.phys);
                }
                None => {
                    let slot = alloc_spill_slot();
                    assignment.insert(interval.reg.packed(), Assignment::Spill(slot));
                    trace!("spill {:?} to slot {slot}", interval.reg);
                }
            }
        }

        // Rewrite every occurrence. Spilled registers travel through the
        // reserved shuttles: reloads go in front of the instruction, stores
        // after it, so uses always see pre-instruction values.
        let stack_pointer = ctx.encoder.stack_pointer_reg();
        for &inst_ref in &sequence {
            let inst = *ctx.insts.at(inst_ref);
            // (shuttle, slot, reloads, stores) per distinct spilled register.
            let mut shuttled: SmallVec<[(MicroReg, u32, bool, bool); 2]> = SmallVec::new();
            let mut shuttle_by_reg: FxHashMap<u32, usize> = FxHashMap::default();
            let mut next_int_shuttle = 0;

            for_each_reg_operand(inst.op, ctx.operands.ops_mut(&inst), |reg, role| {
                if !reg.is_virtual() {
                    return;
                }
                match assignment.get(&reg.packed()) {
                    Some(Assignment::Phys(phys)) => *reg = *phys,
                    Some(Assignment::Spill(slot)) => {
                        let index = *shuttle_by_reg.entry(reg.packed()).or_insert_with(|| {
                            let shuttle = if reg.is_float() {
                                float_shuttle
                            } else {
                                let shuttle = match next_int_shuttle {
                                    0 => shuttle_a,
                                    1 => shuttle_b,
                                    _ => panic!(
                                        "more than two spilled integer operands in one instruction"
                                    ),
                                };
                                next_int_shuttle += 1;
                                shuttle
                            };
                            shuttled.push((shuttle, *slot, false, false));
                            shuttled.len() - 1
                        });
                        let entry = &mut shuttled[index];
                        entry.2 |= role != RegUse::Def;
                        entry.3 |= role != RegUse::Use;
                        *reg = entry.0;
                    }
                    None => unreachable!("virtual register without an interval"),
                }
            });

            for &(shuttle, slot, reload, _) in &shuttled {
                if !reload {
                    continue;
                }
                let load = mem_inst(
                    ctx.operands,
                    MicroOpcode::LoadRegMem,
                    MicroOperand::Reg(shuttle),
                    MicroOperand::Reg(stack_pointer),
                    MicroOperand::Bits(OpBits::B64),
                    MicroOperand::U64(u64::from(slot) * 8),
                );
                ctx.insts.insert_before(inst_ref, load);
            }
            let mut insert_at = inst_ref;
            for &(shuttle, slot, _, store) in &shuttled {
                if !store {
                    continue;
                }
                let store = mem_inst(
                    ctx.operands,
                    MicroOpcode::LoadMemReg,
                    MicroOperand::Reg(stack_pointer),
                    MicroOperand::Reg(shuttle),
                    MicroOperand::Bits(OpBits::B64),
                    MicroOperand::U64(u64::from(slot) * 8),
                );
                insert_at = ctx.insts.insert_after(insert_at, store);
            }
        }

        let final_sequence = ctx.insts.sequence();
        self.collect_frame_facts(ctx, &final_sequence, num_spill_slots * 8);
        true
    }
}

impl RegAllocPass {
    /// Record the spill-area size and which callee-saved registers the
    /// function writes; prolog/epilog consumes both.
    fn collect_frame_facts(&self, ctx: &mut PassCtx, sequence: &[InstRef], spill_bytes: u32) {
        let conv = ctx.call_conv.get();
        let mut written: FxHashSet<u32> = FxHashSet::default();
        for &inst_ref in sequence {
            let inst = *ctx.insts.at(inst_ref);
            let use_def = collect_use_def(&inst, ctx.operands.ops(&inst), Some(&*ctx.encoder));
            for def in &use_def.defs {
                written.insert(def.packed());
            }
        }
        ctx.frame.saved_int_regs = conv
            .callee_saved_int
            .iter()
            .copied()
            .filter(|reg| written.contains(&reg.packed()))
            .collect();
        ctx.frame.spill_area_size = spill_bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::RegAllocPass;
    use crate::micro::builder::MicroBuilder;
    use crate::micro::passes::run_one;
    use crate::micro::{
        collect_use_def, AluOp, EmitFlags, MicroOpcode, OpBits, RegClass,
    };

    fn assert_no_virtuals(b: &MicroBuilder) {
        let mut cursor = b.insts().first();
        while let Some(inst_ref) = cursor {
            cursor = b.insts().next(inst_ref);
            let inst = *b.insts().at(inst_ref);
            let use_def = collect_use_def(&inst, b.operands().ops(&inst), None);
            for reg in use_def.uses.iter().chain(use_def.defs.iter()) {
                assert!(!reg.is_virtual(), "virtual register survived: {reg:?}");
            }
        }
    }

    #[test]
    fn virtuals_become_physical() {
        let mut b = MicroBuilder::new();
        let r0 = b.new_vreg(RegClass::Int);
        let r1 = b.new_vreg(RegClass::Int);
        b.encode_load_reg_imm(r0, 1, OpBits::B64, EmitFlags::ZERO);
        b.encode_load_reg_imm(r1, 2, OpBits::B64, EmitFlags::ZERO);
        b.encode_op_binary_reg_reg(r1, r0, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, RegAllocPass);
        assert_no_virtuals(&b);
    }

    #[test]
    fn class_is_preserved() {
        let mut b = MicroBuilder::new();
        let int_reg = b.new_vreg(RegClass::Int);
        let float_reg = b.new_vreg(RegClass::Float);
        let load = b.encode_load_reg_imm(int_reg, 1, OpBits::B64, EmitFlags::ZERO);
        let fmov = b.encode_load_reg_reg(float_reg, float_reg, OpBits::B64, EmitFlags::ZERO);
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, RegAllocPass);
        let load_inst = *b.insts().at(load);
        assert!(b.operands().ops(&load_inst)[0].reg().is_int());
        let fmov_inst = *b.insts().at(fmov);
        assert!(b.operands().ops(&fmov_inst)[0].reg().is_float());
        assert_no_virtuals(&b);
    }

    #[test]
    fn distinct_live_ranges_share_or_split_registers() {
        let mut b = MicroBuilder::new();
        let regs: Vec<_> = (0..4).map(|_| b.new_vreg(RegClass::Int)).collect();
        for (i, &r) in regs.iter().enumerate() {
            b.encode_load_reg_imm(r, i as u64, OpBits::B64, EmitFlags::ZERO);
            b.encode_op_binary_reg_imm(r, 1, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        }
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, RegAllocPass);
        assert_no_virtuals(&b);
    }

    #[test]
    fn pressure_forces_spills() {
        let mut b = MicroBuilder::new();
        // More simultaneously-live registers than any convention has
        // callee-saved: forces spill traffic.
        let regs: Vec<_> = (0..12).map(|_| b.new_vreg(RegClass::Int)).collect();
        for (i, &r) in regs.iter().enumerate() {
            b.encode_load_reg_imm(r, i as u64, OpBits::B64, EmitFlags::ZERO);
        }
        // Keep them all live to the end.
        let sum = b.new_vreg(RegClass::Int);
        b.encode_clear_reg(sum, OpBits::B64, EmitFlags::ZERO);
        for &r in &regs {
            b.encode_op_binary_reg_reg(sum, r, AluOp::Add, OpBits::B64, EmitFlags::ZERO);
        }
        b.encode_ret(EmitFlags::ZERO);
        run_one(&mut b, RegAllocPass);
        assert_no_virtuals(&b);
        // Spill traffic exists: there must be stores to the stack.
        let mut stores = 0;
        let mut cursor = b.insts().first();
        while let Some(inst_ref) = cursor {
            cursor = b.insts().next(inst_ref);
            if b.insts().at(inst_ref).op == MicroOpcode::LoadMemReg {
                stores += 1;
            }
        }
        assert!(stores > 0, "expected spill stores under register pressure");
    }
}
