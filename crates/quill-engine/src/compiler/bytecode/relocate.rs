//! Label resolution, dead-jump compaction, and code merging

use super::code::{CodeError, CodeObject, MAX_LABELS};
use super::opcode::{Jump, JumpCondition, Opcode};
use tracing::{trace, warn};

impl CodeObject {
    /// Resolve symbolic labels to absolute instruction indices
    ///
    /// Label definitions become `Nop`s in place, so instruction indices do
    /// not change. Jumps to labels that were never defined are pointed at
    /// the end of the code. Afterwards the label table is empty.
    pub fn relocate(&mut self) {
        let len = self.len() as u32;
        let mut addresses: Vec<Option<u32>> = vec![None; self.num_labels() as usize];
        let mut code = self.instructions().to_vec();

        for (pc, op) in code.iter_mut().enumerate() {
            if let Opcode::Label(id) = *op {
                let id = usize::from(id);
                if id >= addresses.len() {
                    addresses.resize(id + 1, None);
                }
                addresses[id] = Some(pc as u32);
                *op = Opcode::Nop;
            }
        }

        for (pc, op) in code.iter_mut().enumerate() {
            if let Opcode::Jump(jump) = op {
                if jump.symbolic {
                    let label = jump.target;
                    jump.target = match addresses.get(label as usize).copied().flatten() {
                        Some(target) => target,
                        None => {
                            warn!(pc, label, "jump to undefined label");
                            len
                        }
                    };
                    jump.symbolic = false;
                }
            }
        }

        self.replace_code(code);
        self.clear_labels();
    }

    /// Remove redundant control flow
    ///
    /// Jumps to unconditional jumps are threaded through, then `Nop`s and
    /// non-popping jumps to the following instruction are removed. Jump
    /// targets and the line map are renumbered; a removed instruction's
    /// line entry moves to the next surviving instruction.
    pub fn compact(&mut self) {
        if self.needs_relocation() {
            self.relocate();
        }
        let mut code = self.instructions().to_vec();
        thread_jumps(&mut code);

        let mut lines = self.line_numbers().to_vec();
        loop {
            let keep: Vec<bool> = code
                .iter()
                .enumerate()
                .map(|(pc, op)| !is_redundant(pc, op))
                .collect();
            if keep.iter().all(|&k| k) {
                break;
            }

            // new_index[i] is the new position of the first kept
            // instruction at or after i.
            let mut new_index = Vec::with_capacity(code.len() + 1);
            let mut next = 0u32;
            for &k in &keep {
                new_index.push(next);
                if k {
                    next += 1;
                }
            }
            new_index.push(next);

            let removed = code.len() - next as usize;
            code = code
                .into_iter()
                .zip(keep)
                .filter_map(|(op, k)| k.then_some(op))
                .map(|op| match op {
                    Opcode::Jump(mut jump) => {
                        let target = (jump.target as usize).min(new_index.len() - 1);
                        jump.target = new_index[target];
                        Opcode::Jump(jump)
                    }
                    other => other,
                })
                .collect();

            let mut remapped: Vec<(u32, u32)> = Vec::with_capacity(lines.len());
            for &(pc, line) in &lines {
                let pc = new_index[(pc as usize).min(new_index.len() - 1)];
                match remapped.last_mut() {
                    Some(last) if last.0 == pc => last.1 = line,
                    _ => remapped.push((pc, line)),
                }
            }
            lines = remapped;
            trace!(removed, remaining = code.len(), "compacted code");
        }

        self.replace_code(code);
        self.replace_line_numbers(lines);
    }

    /// Append another code object's instructions to this one
    ///
    /// The appended piece's literals, names and locals are merged into this
    /// object's tables; its labels are renumbered above this object's, and
    /// its absolute jump targets are shifted by the insertion offset.
    pub fn append(&mut self, other: &CodeObject) -> Result<(), CodeError> {
        if self.num_labels() + other.num_labels() > MAX_LABELS {
            return Err(CodeError::TooManyLabels);
        }
        let offset = self.len() as u32;
        let label_base = self.num_labels();

        let literal_map = other
            .literals()
            .iter()
            .map(|v| self.add_literal(v.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let name_map = other
            .names()
            .iter()
            .map(|n| self.add_name(n))
            .collect::<Result<Vec<_>, _>>()?;
        let local_map = other
            .local_names()
            .iter()
            .map(|n| self.add_local_variable(n))
            .collect::<Result<Vec<_>, _>>()?;

        let remap = |table: &[u16], index: u16| table.get(usize::from(index)).copied().unwrap_or(index);
        for &op in other.instructions() {
            let op = match op {
                Opcode::PushLiteral(i) => Opcode::PushLiteral(remap(&literal_map, i)),
                Opcode::PushName(i) => Opcode::PushName(remap(&name_map, i)),
                Opcode::StoreName(i) => Opcode::StoreName(remap(&name_map, i)),
                Opcode::PushLocal(i) => Opcode::PushLocal(remap(&local_map, i)),
                Opcode::StoreLocal(i) => Opcode::StoreLocal(remap(&local_map, i)),
                Opcode::PopLocal(i) => Opcode::PopLocal(remap(&local_map, i)),
                Opcode::Label(id) => Opcode::Label((u32::from(id) + label_base) as u16),
                Opcode::Jump(mut jump) => {
                    jump.target += if jump.symbolic { label_base } else { offset };
                    Opcode::Jump(jump)
                }
                other => other,
            };
            self.add_instruction(op);
        }

        for _ in 0..other.num_labels() {
            self.make_label()?;
        }

        let mut lines = self.line_numbers().to_vec();
        for &(pc, line) in other.line_numbers() {
            let pc = pc + offset;
            match lines.last_mut() {
                Some(last) if last.0 == pc => last.1 = line,
                _ => lines.push((pc, line)),
            }
        }
        self.replace_line_numbers(lines);
        Ok(())
    }
}

fn is_redundant(pc: usize, op: &Opcode) -> bool {
    match op {
        Opcode::Nop => true,
        Opcode::Jump(Jump {
            condition,
            pop: false,
            symbolic: false,
            target,
        }) => *condition != JumpCondition::Catch && *target as usize == pc + 1,
        _ => false,
    }
}

/// Retarget jumps whose destination is an unconditional non-popping jump
fn thread_jumps(code: &mut [Opcode]) {
    let final_target = |code: &[Opcode], mut target: u32| {
        for _ in 0..code.len() {
            match code.get(target as usize) {
                Some(Opcode::Jump(Jump {
                    condition: JumpCondition::Always,
                    pop: false,
                    symbolic: false,
                    target: next,
                })) if *next != target => target = *next,
                _ => break,
            }
        }
        target
    };
    for pc in 0..code.len() {
        if let Opcode::Jump(jump) = code[pc] {
            let target = final_target(code, jump.target);
            if target != jump.target {
                code[pc] = Opcode::Jump(Jump { target, ..jump });
            }
        }
    }
}
