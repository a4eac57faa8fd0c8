//! Syntax tree for one compilation unit *before* it is lowered to byte-code.

use crate::isa::Opcode;
use crate::processor::symbols::{FuncId, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Void,
    Int,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl NumOp {
    pub fn opcode(self) -> Opcode {
        match self {
            NumOp::Add => Opcode::Add,
            NumOp::Sub => Opcode::Sub,
            NumOp::Mul => Opcode::Mul,
            NumOp::Div => Opcode::Div,
            NumOp::Mod => Opcode::Mod,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl BoolOp {
    /// The comparator jump that is taken when the relation holds.
    pub fn opcode(self) -> Opcode {
        match self {
            BoolOp::Eq => Opcode::Jeq,
            BoolOp::Ne => Opcode::Jne,
            BoolOp::Gt => Opcode::Jg,
            BoolOp::Lt => Opcode::Jl,
            BoolOp::Ge => Opcode::Jge,
            BoolOp::Le => Opcode::Jle,
        }
    }
}

/// A name in the source. `var` is bound when the production that uses the
/// name reduces; the variable's frame slot is only known once the enclosing
/// function has been finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub line: usize,
    pub var: Option<VarId>,
}

impl Ident {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
            var: None,
        }
    }
}

/// One `type name` entry of a function header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDef {
    pub ty: Dtype,
    pub name: String,
    pub line: usize,
}

/// A call site; the callee is bound when the production reduces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub func: FuncId,
    pub name: String,
    pub args: Vec<Node>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Whole compilation unit, in source order.
    Program { functions: Vec<Node> },

    /// Variable read.
    Variable(Ident),

    IntLiteral(i32),

    /// `lhs [op rhs]` – right-recursive, no precedence levels.
    Expression {
        lhs: Box<Node>,
        rhs: Option<(NumOp, Box<Node>)>,
    },

    /// `lhs op rhs`; only valid as the guard of a branch or loop.
    Condition {
        lhs: Box<Node>,
        op: BoolOp,
        rhs: Box<Node>,
    },

    /// `int x` or `int x = expr`.
    VarDef {
        target: Ident,
        ty: Dtype,
        init: Option<Box<Node>>,
    },

    /// `x = expr`.
    VarAssign { target: Ident, value: Box<Node> },

    /// `print expr`.
    Print(Box<Node>),

    /// `return [expr]`.
    Return {
        value: Option<Box<Node>>,
        line: usize,
    },

    /// `f(args)` used as a statement.
    Call(Call),

    /// `f(args)` used where a value is required.
    RetCall(Call),

    /// Statement sequence.
    Block(Vec<Node>),

    /// `if (cond) { … } [else { … }]`.
    Branch {
        cond: Box<Node>,
        then_arm: Box<Node>,
        else_arm: Option<Box<Node>>,
    },

    /// `while (cond) { body }`.
    While { cond: Box<Node>, body: Box<Node> },

    /// `for (init; cond; step) { body }`.
    For {
        init: Box<Node>,
        cond: Box<Node>,
        step: Box<Node>,
        body: Box<Node>,
    },

    /// `do { body } while (cond);`.
    DoWhile { body: Box<Node>, cond: Box<Node> },

    /// Full definition.
    Function { func: FuncId, body: Box<Node> },

    /// `type name(args);` – carries no code.
    Prototype { func: FuncId },
}

impl Node {
    /// Calls `f` on every direct child, in source order.
    pub fn for_each_child<'a>(&'a self, mut f: impl FnMut(&'a Node)) {
        match self {
            Node::Program { functions: nodes } | Node::Block(nodes) => nodes.iter().for_each(f),
            Node::Call(call) | Node::RetCall(call) => call.args.iter().for_each(f),
            Node::Expression { lhs, rhs } => {
                f(lhs);
                if let Some((_, rhs)) = rhs {
                    f(rhs);
                }
            }
            Node::Condition { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Node::VarDef { init, .. } => {
                if let Some(init) = init {
                    f(init);
                }
            }
            Node::VarAssign { value, .. } | Node::Print(value) => f(value),
            Node::Return { value, .. } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            Node::Branch {
                cond,
                then_arm,
                else_arm,
            } => {
                f(cond);
                f(then_arm);
                if let Some(else_arm) = else_arm {
                    f(else_arm);
                }
            }
            Node::While { cond, body } => {
                f(cond);
                f(body);
            }
            Node::For {
                init,
                cond,
                step,
                body,
            } => {
                f(init);
                f(cond);
                f(step);
                f(body);
            }
            Node::DoWhile { body, cond } => {
                f(body);
                f(cond);
            }
            Node::Function { body, .. } => f(body),
            Node::Variable(_) | Node::IntLiteral(_) | Node::Prototype { .. } => {}
        }
    }

    /// Whether this statement list ends in an explicit `return`.
    pub fn ends_with_return(&self) -> bool {
        match self {
            Node::Return { .. } => true,
            Node::Block(stmts) => stmts.last().is_some_and(Node::ends_with_return),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_are_visited_in_source_order() {
        let node = Node::Branch {
            cond: Box::new(Node::IntLiteral(1)),
            then_arm: Box::new(Node::IntLiteral(2)),
            else_arm: Some(Box::new(Node::IntLiteral(3))),
        };
        let mut seen = Vec::new();
        node.for_each_child(|child| {
            if let Node::IntLiteral(v) = child {
                seen.push(*v);
            }
        });
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn trailing_return_detection() {
        let ret = Node::Return {
            value: None,
            line: 1,
        };
        let body = Node::Block(vec![Node::Print(Box::new(Node::IntLiteral(1))), ret.clone()]);
        assert!(body.ends_with_return());

        let nested = Node::Block(vec![Node::Branch {
            cond: Box::new(Node::IntLiteral(0)),
            then_arm: Box::new(Node::Block(vec![ret])),
            else_arm: None,
        }]);
        assert!(!nested.ends_with_return());
        assert!(!Node::Block(vec![]).ends_with_return());
    }
}
