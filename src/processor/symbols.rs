//! Per-unit symbol tables and frame layout.
//!
//! Functions live in one flat table for the whole compilation unit; every
//! function owns a flat variable table (there are no nested scopes). Frame
//! slots are assigned when a function body has been fully reduced:
//!
//! ```text
//!   slot 0 .. staging               outgoing call arguments
//!   slot staging + i                local i        (0-indexed)
//!   slot staging + locals + k       argument k     (1-indexed)
//! ```
//!
//! Slot `staging + locals` itself is the caller's return address, which is
//! why arguments start one past it.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::CompileError;
use crate::processor::ast::{ArgDef, Dtype, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncId(pub usize);

/// Index into the owning function's variable list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Local(u32),
    /// 1-indexed position in the argument list.
    Argument(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSymbol {
    pub name: String,
    pub dtype: Dtype,
    pub kind: VarKind,
    /// Assigned once the owning function has been reduced.
    pub slot: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSymbol {
    pub name: String,
    pub ret: Dtype,
    pub line: usize,
    pub prototype_only: bool,
    /// Filled in by the generator.
    pub address: Option<u32>,
    pub arg_types: Vec<Dtype>,
    pub local_count: u32,
    pub staging_size: u32,
    vars: BTreeMap<String, VarId>,
    pub variables: Vec<VariableSymbol>,
}

impl FunctionSymbol {
    fn new(name: &str, ret: Dtype, line: usize, prototype_only: bool) -> Self {
        Self {
            name: name.to_string(),
            ret,
            line,
            prototype_only,
            address: None,
            arg_types: Vec::new(),
            local_count: 0,
            staging_size: 0,
            vars: BTreeMap::new(),
            variables: Vec::new(),
        }
    }

    pub fn arg_count(&self) -> u32 {
        self.arg_types.len() as u32
    }

    /// Words reserved by `PROLOG`: staging zone plus locals.
    pub fn frame_size(&self) -> u32 {
        self.staging_size + self.local_count
    }

    pub fn variable(&self, id: VarId) -> &VariableSymbol {
        &self.variables[id.0]
    }

    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.vars.get(name).copied()
    }

    fn insert(&mut self, name: &str, dtype: Dtype, kind: VarKind, line: usize) -> Result<VarId, CompileError> {
        if self.vars.contains_key(name) {
            return Err(CompileError::semantic(
                line,
                format!("redeclaration of '{name}' in function '{}'", self.name),
            ));
        }
        let id = VarId(self.variables.len());
        self.variables.push(VariableSymbol {
            name: name.to_string(),
            dtype,
            kind,
            slot: None,
        });
        self.vars.insert(name.to_string(), id);
        Ok(id)
    }

    fn set_arguments(&mut self, args: &[ArgDef]) -> Result<(), CompileError> {
        self.arg_types.clear();
        self.vars.clear();
        self.variables.clear();
        for (i, arg) in args.iter().enumerate() {
            if arg.ty == Dtype::Void {
                return Err(CompileError::semantic(
                    arg.line,
                    format!("argument '{}' declared void", arg.name),
                ));
            }
            self.insert(&arg.name, arg.ty, VarKind::Argument(i as u32 + 1), arg.line)?;
            self.arg_types.push(arg.ty);
        }
        Ok(())
    }
}

/// Everything the parser's semantic actions need to remember about one
/// compilation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileContext {
    functions: Vec<FunctionSymbol>,
    by_name: BTreeMap<String, FuncId>,
    current: Option<FuncId>,
    /// Largest argument count of any call site reduced so far.
    max_call_arity: u32,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, id: FuncId) -> &FunctionSymbol {
        &self.functions[id.0]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut FunctionSymbol {
        &mut self.functions[id.0]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &FunctionSymbol)> {
        self.functions.iter().enumerate().map(|(i, f)| (FuncId(i), f))
    }

    pub fn lookup_function(&self, name: &str) -> Option<FuncId> {
        self.by_name.get(name).copied()
    }

    fn register(&mut self, symbol: FunctionSymbol) -> FuncId {
        let id = FuncId(self.functions.len());
        self.by_name.insert(symbol.name.clone(), id);
        self.functions.push(symbol);
        id
    }

    fn check_matches_prototype(
        &self,
        id: FuncId,
        ret: Dtype,
        args: &[ArgDef],
        line: usize,
    ) -> Result<(), CompileError> {
        let proto = self.function(id);
        let types: Vec<Dtype> = args.iter().map(|a| a.ty).collect();
        if proto.ret != ret || proto.arg_types != types {
            return Err(CompileError::semantic(
                line,
                format!(
                    "definition of '{}' does not match its prototype on line {}",
                    proto.name, proto.line
                ),
            ));
        }
        Ok(())
    }

    /// `type name(args);`
    pub fn declare_prototype(
        &mut self,
        name: &str,
        ret: Dtype,
        args: &[ArgDef],
        line: usize,
    ) -> Result<FuncId, CompileError> {
        if let Some(id) = self.lookup_function(name) {
            let what = if self.function(id).prototype_only {
                "duplicate prototype"
            } else {
                "prototype after definition"
            };
            return Err(CompileError::semantic(line, format!("{what} of '{name}'")));
        }
        let mut symbol = FunctionSymbol::new(name, ret, line, true);
        symbol.set_arguments(args)?;
        Ok(self.register(symbol))
    }

    /// Registers a function definition as soon as its header has been read,
    /// so that the body may call it recursively.
    pub fn begin_function(
        &mut self,
        name: &str,
        ret: Dtype,
        args: &[ArgDef],
        line: usize,
    ) -> Result<FuncId, CompileError> {
        let id = match self.lookup_function(name) {
            Some(id) if self.function(id).prototype_only => {
                self.check_matches_prototype(id, ret, args, line)?;
                let symbol = self.function_mut(id);
                symbol.prototype_only = false;
                symbol.line = line;
                id
            }
            Some(id) => {
                return Err(CompileError::semantic(
                    line,
                    format!(
                        "redefinition of '{name}', first defined on line {}",
                        self.function(id).line
                    ),
                ));
            }
            None => self.register(FunctionSymbol::new(name, ret, line, false)),
        };
        // the definition's argument names win over the prototype's
        self.function_mut(id).set_arguments(args)?;
        self.current = Some(id);
        Ok(id)
    }

    fn current(&self, line: usize) -> Result<FuncId, CompileError> {
        self.current
            .ok_or_else(|| CompileError::semantic(line, "statement outside of a function"))
    }

    pub fn declare_local(&mut self, name: &str, dtype: Dtype, line: usize) -> Result<VarId, CompileError> {
        if dtype == Dtype::Void {
            return Err(CompileError::semantic(line, format!("variable '{name}' declared void")));
        }
        let id = self.current(line)?;
        let symbol = self.function_mut(id);
        let index = symbol.local_count;
        let var = symbol.insert(name, dtype, VarKind::Local(index), line)?;
        symbol.local_count += 1;
        Ok(var)
    }

    pub fn lookup_variable(&self, name: &str, line: usize) -> Result<VarId, CompileError> {
        let id = self.current(line)?;
        let symbol = self.function(id);
        symbol.lookup(name).ok_or_else(|| {
            CompileError::semantic(
                line,
                format!("'{name}' is not declared in function '{}'", symbol.name),
            )
        })
    }

    /// Binds a call site to its callee and records its arity for staging.
    pub fn resolve_call(
        &mut self,
        name: &str,
        argc: usize,
        needs_value: bool,
        line: usize,
    ) -> Result<FuncId, CompileError> {
        let id = self
            .lookup_function(name)
            .ok_or_else(|| CompileError::semantic(line, format!("call to undeclared function '{name}'")))?;
        let callee = self.function(id);
        if callee.arg_count() as usize != argc {
            return Err(CompileError::semantic(
                line,
                format!(
                    "'{name}' takes {} argument(s) but {argc} were supplied",
                    callee.arg_count()
                ),
            ));
        }
        if needs_value && callee.ret == Dtype::Void {
            return Err(CompileError::semantic(
                line,
                format!("void function '{name}' used as a value"),
            ));
        }
        self.max_call_arity = self.max_call_arity.max(argc as u32);
        Ok(id)
    }

    /// Checks the returns of a reduced body and lays out the frame.
    pub fn finish_function(&mut self, id: FuncId, body: &Node) -> Result<(), CompileError> {
        let ret = self.function(id).ret;
        check_returns(body, ret, &self.function(id).name)?;

        let staging = self.max_call_arity;
        let symbol = self.function_mut(id);
        symbol.staging_size = staging;
        let locals = symbol.local_count;
        for var in symbol.variables.iter_mut() {
            var.slot = Some(match var.kind {
                VarKind::Local(i) => staging + i,
                VarKind::Argument(k) => staging + locals + k,
            });
        }
        debug!(
            function = %symbol.name,
            staging,
            locals,
            args = symbol.arg_count(),
            "frame laid out"
        );
        self.current = None;
        Ok(())
    }
}

fn check_returns(node: &Node, ret: Dtype, function: &str) -> Result<(), CompileError> {
    if let Node::Return { value, line } = node {
        match (ret, value.is_some()) {
            (Dtype::Void, true) => {
                return Err(CompileError::semantic(
                    *line,
                    format!("void function '{function}' returns a value"),
                ));
            }
            (Dtype::Int, false) => {
                return Err(CompileError::semantic(
                    *line,
                    format!("function '{function}' must return a value"),
                ));
            }
            _ => {}
        }
    }
    let mut result = Ok(());
    node.for_each_child(|child| {
        if result.is_ok() {
            result = check_returns(child, ret, function);
        }
    });
    result
}
