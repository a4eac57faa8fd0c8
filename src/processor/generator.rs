//! Lowers a parsed program to a flat instruction list.
//!
//! Layout of the output:
//!
//! ```text
//!   0:  [prolog argc; argload 0 .. argload argc-1]   when main takes arguments
//!       call main
//!       finish
//!       <functions in source order>
//! ```

use tracing::debug;

use crate::error::CompileError;
use crate::isa::{Instruction, Opcode};
use crate::processor::ast::{Call, Ident, Node};
use crate::processor::symbols::{CompileContext, FuncId};

pub const ENTRY_FUNCTION: &str = "main";

struct Generator<'c> {
    ctx: &'c mut CompileContext,
    code: Vec<Instruction>,
    addr: u32,
    /// Call instructions whose target is only known once every function
    /// has been placed.
    call_patches: Vec<(usize, FuncId)>,
    current: Option<FuncId>,
}

/// Generates code for `program`, storing each function's address in `ctx`.
pub fn generate(program: &Node, ctx: &mut CompileContext) -> Result<Vec<Instruction>, CompileError> {
    let Node::Program { functions } = program else {
        return Err(CompileError::Codegen("expected a program node".into()));
    };

    let mut g = Generator {
        ctx,
        code: Vec::new(),
        addr: 0,
        call_patches: Vec::new(),
        current: None,
    };
    g.entry()?;
    for function in functions {
        g.function(function)?;
    }
    g.patch_calls()?;

    debug!(instructions = g.code.len(), words = g.addr, "generated code");
    Ok(g.code)
}

impl Generator<'_> {
    fn emit(&mut self, instr: Instruction) -> usize {
        self.addr += instr.width();
        self.code.push(instr);
        self.code.len() - 1
    }

    fn op(&mut self, opcode: Opcode) -> usize {
        self.emit(Instruction::new(opcode))
    }

    fn op_arg(&mut self, opcode: Opcode, operand: u32) -> usize {
        self.emit(Instruction::with_operand(opcode, operand))
    }

    fn patch(&mut self, index: usize, target: u32) {
        self.code[index].operand = target;
    }

    fn entry(&mut self) -> Result<(), CompileError> {
        let main = self.ctx.lookup_function(ENTRY_FUNCTION).ok_or_else(|| {
            CompileError::Codegen(format!(
                "could not create entry point: {ENTRY_FUNCTION} function not found"
            ))
        })?;

        let argc = self.ctx.function(main).arg_count();
        if argc > 0 {
            self.op_arg(Opcode::Prolog, argc);
            for i in 0..argc {
                self.op_arg(Opcode::ArgLoad, i);
            }
        }
        let call = self.op_arg(Opcode::Call, 0);
        self.call_patches.push((call, main));
        self.op(Opcode::Finish);
        Ok(())
    }

    fn patch_calls(&mut self) -> Result<(), CompileError> {
        for (index, func) in std::mem::take(&mut self.call_patches) {
            let symbol = self.ctx.function(func);
            let target = symbol.address.ok_or_else(|| {
                CompileError::Codegen(format!(
                    "function '{}' is called but never defined",
                    symbol.name
                ))
            })?;
            self.patch(index, target);
        }
        Ok(())
    }

    fn frame_size(&self) -> u32 {
        self.current
            .map_or(0, |id| self.ctx.function(id).frame_size())
    }

    fn slot(&self, ident: &Ident) -> Result<u32, CompileError> {
        let unresolved = || CompileError::Codegen(format!("unresolved identifier '{}'", ident.name));
        let func = self.current.ok_or_else(unresolved)?;
        let var = ident.var.ok_or_else(unresolved)?;
        self.ctx.function(func).variable(var).slot.ok_or_else(unresolved)
    }

    fn function(&mut self, node: &Node) -> Result<(), CompileError> {
        let (func, body) = match node {
            Node::Function { func, body } => (*func, body),
            Node::Prototype { .. } => return Ok(()),
            other => {
                return Err(CompileError::Codegen(format!(
                    "unexpected top-level node {other:?}"
                )));
            }
        };

        self.ctx.function_mut(func).address = Some(self.addr);
        self.current = Some(func);

        let frame = self.frame_size();
        if frame > 0 {
            self.op_arg(Opcode::Prolog, frame);
        }
        self.statement(body)?;
        if !body.ends_with_return() {
            self.leave();
        }

        self.current = None;
        Ok(())
    }

    /// `epilog frame; ret`
    fn leave(&mut self) {
        let frame = self.frame_size();
        if frame > 0 {
            self.op_arg(Opcode::Epilog, frame);
        }
        self.op(Opcode::Ret);
    }

    fn statement(&mut self, node: &Node) -> Result<(), CompileError> {
        match node {
            Node::Block(stmts) => {
                for stmt in stmts {
                    self.statement(stmt)?;
                }
            }
            Node::VarDef { target, init, .. } => {
                if let Some(init) = init {
                    self.expression(init)?;
                    let slot = self.slot(target)?;
                    self.op_arg(Opcode::Store, slot);
                }
            }
            Node::VarAssign { target, value } => {
                self.expression(value)?;
                let slot = self.slot(target)?;
                self.op_arg(Opcode::Store, slot);
            }
            Node::Print(value) => {
                self.expression(value)?;
                self.op(Opcode::Print);
            }
            Node::Return { value, .. } => {
                if let Some(value) = value {
                    self.expression(value)?;
                }
                self.leave();
            }
            // the callee's return value, if any, stays on the stack
            Node::Call(call) => self.call(call)?,
            Node::Branch {
                cond,
                then_arm,
                else_arm,
            } => {
                let skip_then = self.condition(cond, true)?;
                self.statement(then_arm)?;
                match else_arm {
                    Some(else_arm) => {
                        let skip_else = self.op_arg(Opcode::Jmp, 0);
                        let else_addr = self.addr;
                        self.patch(skip_then, else_addr);
                        self.statement(else_arm)?;
                        let end = self.addr;
                        self.patch(skip_else, end);
                    }
                    None => {
                        let end = self.addr;
                        self.patch(skip_then, end);
                    }
                }
            }
            Node::While { cond, body } => {
                let to_test = self.op_arg(Opcode::Jmp, 0);
                let top = self.addr;
                self.statement(body)?;
                self.loop_test(to_test, cond, top)?;
            }
            Node::For {
                init,
                cond,
                step,
                body,
            } => {
                self.statement(init)?;
                let to_test = self.op_arg(Opcode::Jmp, 0);
                let top = self.addr;
                self.statement(body)?;
                self.statement(step)?;
                self.loop_test(to_test, cond, top)?;
            }
            Node::DoWhile { body, cond } => {
                let top = self.addr;
                self.statement(body)?;
                let back = self.condition(cond, false)?;
                self.patch(back, top);
            }
            other => {
                return Err(CompileError::Codegen(format!(
                    "unexpected statement node {other:?}"
                )));
            }
        }
        Ok(())
    }

    /// Places the loop test, pointing the entry jump at it and jumping back
    /// to `top` while the condition holds.
    fn loop_test(&mut self, entry_jump: usize, cond: &Node, top: u32) -> Result<(), CompileError> {
        let test = self.addr;
        self.patch(entry_jump, test);
        let back = self.condition(cond, false)?;
        self.patch(back, top);
        Ok(())
    }

    /// Emits both operands and a comparator with an unpatched target,
    /// returning its index.
    fn condition(&mut self, node: &Node, negate: bool) -> Result<usize, CompileError> {
        let Node::Condition { lhs, op, rhs } = node else {
            return Err(CompileError::Codegen(format!("expected a condition, got {node:?}")));
        };
        self.expression(lhs)?;
        self.expression(rhs)?;
        let mut jump = op.opcode();
        if negate {
            jump = jump
                .negated()
                .ok_or_else(|| CompileError::Codegen(format!("{jump} has no negation")))?;
        }
        Ok(self.op_arg(jump, 0))
    }

    fn call(&mut self, call: &Call) -> Result<(), CompileError> {
        for arg in &call.args {
            self.expression(arg)?;
        }
        for slot in (0..call.args.len() as u32).rev() {
            self.op_arg(Opcode::Store, slot);
        }
        let index = self.op_arg(Opcode::Call, 0);
        self.call_patches.push((index, call.func));
        Ok(())
    }

    fn expression(&mut self, node: &Node) -> Result<(), CompileError> {
        match node {
            Node::Expression { lhs, rhs } => {
                self.expression(lhs)?;
                if let Some((op, rhs)) = rhs {
                    self.expression(rhs)?;
                    self.op(op.opcode());
                }
            }
            Node::IntLiteral(v) => {
                self.op_arg(Opcode::Push, *v as u32);
            }
            Node::Variable(ident) => {
                let slot = self.slot(ident)?;
                self.op_arg(Opcode::Load, slot);
            }
            Node::RetCall(call) => self.call(call)?,
            other => {
                return Err(CompileError::Codegen(format!(
                    "unexpected expression node {other:?}"
                )));
            }
        }
        Ok(())
    }
}
