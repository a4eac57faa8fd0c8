//! Backtracking recursive-descent parser.
//
//  program    ::= function* EOF
//  function   ::= type ident '(' arglist ')' ( ';' | '{' block '}' )
//  arglist    ::= 'void' | ε | type ident ( ',' type ident )*
//  block      ::= statement*
//  statement  ::= ( vardecl | assign | call | print | return ) ';'
//               | branch | while | for | dowhile
//  vardecl    ::= type ident ( '=' expr )?
//  assign     ::= ident '=' expr
//  call       ::= ident '(' ( expr ( ',' expr )* )? ')'
//  print      ::= 'print' expr
//  return     ::= 'return' expr?
//  branch     ::= 'if' '(' cond ')' '{' block '}' ( 'else' '{' block '}' )?
//  while      ::= 'while' '(' cond ')' '{' block '}'
//  for        ::= 'for' '(' ( vardecl | assign ) ';' cond ';' assign ')' '{' block '}'
//  dowhile    ::= 'do' '{' block '}' 'while' '(' cond ')' ';'
//  expr       ::= term ( numop expr )?
//  term       ::= '(' expr ')' | call | ident | int | '-' int
//  cond       ::= expr boolop expr
//
// Every nonterminal returns `Ok(None)` when its alternatives do not match and
// leaves the cursor where it found it. Semantic actions run when a
// production reduces and their failures are final.

use tracing::debug;

use crate::error::CompileError;
use crate::processor::ast::{ArgDef, BoolOp, Call, Dtype, Ident, Node, NumOp};
use crate::processor::lexer::{Token, TokenKind};
use crate::processor::symbols::CompileContext;

type PResult<T> = Result<Option<T>, CompileError>;

/// Bail out of the current alternative when a sub-match fails.
macro_rules! require {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

pub struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// Furthest token any alternative failed on; used for diagnostics.
    furthest: usize,
    ctx: CompileContext,
}

impl<'t> Parser<'t> {
    /// `tokens` must end with the end marker, as produced by `tokenize`.
    pub fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            furthest: 0,
            ctx: CompileContext::new(),
        }
    }

    /// Parses the whole unit, returning the program node and its symbols.
    pub fn parse(mut self) -> Result<(Node, CompileContext), CompileError> {
        let mut functions = Vec::new();
        while let Some(function) = self.function()? {
            functions.push(function);
        }
        if self.peek_kind() != Some(TokenKind::Eof) {
            return Err(self.syntax_error());
        }
        debug!(functions = functions.len(), "parsed program");
        Ok((Node::Program { functions }, self.ctx))
    }

    fn syntax_error(&self) -> CompileError {
        let at = self.furthest.max(self.pos);
        match self.tokens.get(at).or(self.tokens.last()) {
            Some(tok) => CompileError::Parse {
                line: tok.line,
                near: tok.to_string(),
            },
            None => CompileError::Parse {
                line: 1,
                near: "end of input".into(),
            },
        }
    }

    // ── cursor helpers ──

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn miss(&mut self) {
        self.furthest = self.furthest.max(self.pos);
    }

    /// Consumes a token of exactly `kind`, returning its line.
    fn eat(&mut self, kind: TokenKind) -> Option<usize> {
        if self.peek_kind() == Some(kind) {
            let line = self.line();
            self.pos += 1;
            Some(line)
        } else {
            self.miss();
            None
        }
    }

    fn ident(&mut self) -> Option<Ident> {
        match self.tokens.get(self.pos) {
            Some(tok) if tok.kind == TokenKind::Ident => {
                let id = Ident::new(tok.text.clone(), tok.line);
                self.pos += 1;
                Some(id)
            }
            _ => {
                self.miss();
                None
            }
        }
    }

    fn literal(&mut self) -> Option<u32> {
        match self.peek_kind() {
            Some(TokenKind::IntLiteral(v)) => {
                self.pos += 1;
                Some(v)
            }
            _ => {
                self.miss();
                None
            }
        }
    }

    fn dtype(&mut self) -> Option<Dtype> {
        match self.peek_kind() {
            Some(TokenKind::Int) => {
                self.pos += 1;
                Some(Dtype::Int)
            }
            Some(TokenKind::Void) => {
                self.pos += 1;
                Some(Dtype::Void)
            }
            _ => {
                self.miss();
                None
            }
        }
    }

    /// Runs one alternative, rewinding the cursor when it does not match.
    fn attempt<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let start = self.pos;
        let res = f(self)?;
        if res.is_none() {
            self.pos = start;
        }
        Ok(res)
    }

    // ── declarations ──

    fn function(&mut self) -> PResult<Node> {
        let saved = self.ctx.clone();
        let res = self.attempt(Self::function_inner)?;
        if res.is_none() {
            self.ctx = saved;
        }
        Ok(res)
    }

    fn function_inner(&mut self) -> PResult<Node> {
        let ret = require!(self.dtype());
        let name = require!(self.ident());
        require!(self.eat(TokenKind::OpenParen));
        let args = require!(self.arglist());
        require!(self.eat(TokenKind::CloseParen));

        if self.eat(TokenKind::Semicolon).is_some() {
            let func = self.ctx.declare_prototype(&name.name, ret, &args, name.line)?;
            return Ok(Some(Node::Prototype { func }));
        }

        require!(self.eat(TokenKind::OpenBrace));
        let func = self.ctx.begin_function(&name.name, ret, &args, name.line)?;
        let body = require!(self.block()?);
        require!(self.eat(TokenKind::CloseBrace));
        self.ctx.finish_function(func, &body)?;
        Ok(Some(Node::Function {
            func,
            body: Box::new(body),
        }))
    }

    fn arglist(&mut self) -> Option<Vec<ArgDef>> {
        // `(void)`
        let start = self.pos;
        if self.eat(TokenKind::Void).is_some() {
            if self.peek_kind() == Some(TokenKind::CloseParen) {
                return Some(Vec::new());
            }
            self.pos = start;
        }
        // `()`
        if self.peek_kind() == Some(TokenKind::CloseParen) {
            return Some(Vec::new());
        }

        let mut args = Vec::new();
        loop {
            let ty = self.dtype()?;
            let name = self.ident()?;
            args.push(ArgDef {
                ty,
                name: name.name,
                line: name.line,
            });
            if self.eat(TokenKind::Comma).is_none() {
                return Some(args);
            }
        }
    }

    // ── statements ──

    fn block(&mut self) -> PResult<Node> {
        let mut stmts = Vec::new();
        while let Some(stmt) = self.statement()? {
            stmts.push(stmt);
        }
        Ok(Some(Node::Block(stmts)))
    }

    fn statement(&mut self) -> PResult<Node> {
        let simple: [fn(&mut Self) -> PResult<Node>; 5] = [
            Self::vardecl,
            Self::assign,
            Self::call_statement,
            Self::print,
            Self::ret,
        ];
        for alt in simple {
            let res = self.attempt(|p| {
                let stmt = require!(alt(p)?);
                require!(p.eat(TokenKind::Semicolon));
                Ok(Some(stmt))
            })?;
            if res.is_some() {
                return Ok(res);
            }
        }

        let compound: [fn(&mut Self) -> PResult<Node>; 4] =
            [Self::branch, Self::while_loop, Self::for_loop, Self::do_while];
        for alt in compound {
            if let Some(stmt) = self.attempt(alt)? {
                return Ok(Some(stmt));
            }
        }
        Ok(None)
    }

    fn vardecl(&mut self) -> PResult<Node> {
        let ty = require!(self.dtype());
        let mut target = require!(self.ident());
        // in scope for its own initializer
        target.var = Some(self.ctx.declare_local(&target.name, ty, target.line)?);
        let init = match self.eat(TokenKind::Assign) {
            Some(_) => Some(Box::new(require!(self.expr()?))),
            None => None,
        };
        Ok(Some(Node::VarDef { target, ty, init }))
    }

    fn assign(&mut self) -> PResult<Node> {
        let mut target = require!(self.ident());
        require!(self.eat(TokenKind::Assign));
        let value = require!(self.expr()?);
        target.var = Some(self.ctx.lookup_variable(&target.name, target.line)?);
        Ok(Some(Node::VarAssign {
            target,
            value: Box::new(value),
        }))
    }

    fn call(&mut self, needs_value: bool) -> PResult<Call> {
        let name = require!(self.ident());
        require!(self.eat(TokenKind::OpenParen));
        let mut args = Vec::new();
        if self.eat(TokenKind::CloseParen).is_none() {
            loop {
                args.push(require!(self.expr()?));
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
            require!(self.eat(TokenKind::CloseParen));
        }
        let func = self
            .ctx
            .resolve_call(&name.name, args.len(), needs_value, name.line)?;
        Ok(Some(Call {
            func,
            name: name.name,
            args,
            line: name.line,
        }))
    }

    fn call_statement(&mut self) -> PResult<Node> {
        Ok(self.call(false)?.map(Node::Call))
    }

    fn print(&mut self) -> PResult<Node> {
        require!(self.eat(TokenKind::Print));
        let value = require!(self.expr()?);
        Ok(Some(Node::Print(Box::new(value))))
    }

    fn ret(&mut self) -> PResult<Node> {
        let line = require!(self.eat(TokenKind::Return));
        let value = self.attempt(Self::expr)?.map(Box::new);
        Ok(Some(Node::Return { value, line }))
    }

    /// `'(' cond ')' '{' block '}'` shared by branches and `while`.
    fn guarded_block(&mut self) -> PResult<(Node, Node)> {
        require!(self.eat(TokenKind::OpenParen));
        let cond = require!(self.condition()?);
        require!(self.eat(TokenKind::CloseParen));
        let body = require!(self.braced_block()?);
        Ok(Some((cond, body)))
    }

    fn braced_block(&mut self) -> PResult<Node> {
        require!(self.eat(TokenKind::OpenBrace));
        let body = require!(self.block()?);
        require!(self.eat(TokenKind::CloseBrace));
        Ok(Some(body))
    }

    fn branch(&mut self) -> PResult<Node> {
        require!(self.eat(TokenKind::If));
        let (cond, then_arm) = require!(self.guarded_block()?);
        let else_arm = self.attempt(|p| {
            require!(p.eat(TokenKind::Else));
            p.braced_block()
        })?;
        Ok(Some(Node::Branch {
            cond: Box::new(cond),
            then_arm: Box::new(then_arm),
            else_arm: else_arm.map(Box::new),
        }))
    }

    fn while_loop(&mut self) -> PResult<Node> {
        require!(self.eat(TokenKind::While));
        let (cond, body) = require!(self.guarded_block()?);
        Ok(Some(Node::While {
            cond: Box::new(cond),
            body: Box::new(body),
        }))
    }

    fn for_loop(&mut self) -> PResult<Node> {
        require!(self.eat(TokenKind::For));
        require!(self.eat(TokenKind::OpenParen));
        let init = match self.attempt(Self::vardecl)? {
            Some(init) => init,
            None => require!(self.attempt(Self::assign)?),
        };
        require!(self.eat(TokenKind::Semicolon));
        let cond = require!(self.condition()?);
        require!(self.eat(TokenKind::Semicolon));
        let step = require!(self.attempt(Self::assign)?);
        require!(self.eat(TokenKind::CloseParen));
        let body = require!(self.braced_block()?);
        Ok(Some(Node::For {
            init: Box::new(init),
            cond: Box::new(cond),
            step: Box::new(step),
            body: Box::new(body),
        }))
    }

    fn do_while(&mut self) -> PResult<Node> {
        require!(self.eat(TokenKind::Do));
        let body = require!(self.braced_block()?);
        require!(self.eat(TokenKind::While));
        require!(self.eat(TokenKind::OpenParen));
        let cond = require!(self.condition()?);
        require!(self.eat(TokenKind::CloseParen));
        require!(self.eat(TokenKind::Semicolon));
        Ok(Some(Node::DoWhile {
            body: Box::new(body),
            cond: Box::new(cond),
        }))
    }

    // ── expressions ──

    fn expr(&mut self) -> PResult<Node> {
        let lhs = require!(self.term()?);
        let rhs = self.attempt(|p| {
            let op = require!(p.numop());
            let rhs = require!(p.expr()?);
            Ok(Some((op, Box::new(rhs))))
        })?;
        Ok(Some(Node::Expression {
            lhs: Box::new(lhs),
            rhs,
        }))
    }

    fn term(&mut self) -> PResult<Node> {
        if let Some(inner) = self.attempt(|p| {
            require!(p.eat(TokenKind::OpenParen));
            let inner = require!(p.expr()?);
            require!(p.eat(TokenKind::CloseParen));
            Ok(Some(inner))
        })? {
            return Ok(Some(inner));
        }

        if let Some(call) = self.attempt(|p| p.call(true))? {
            return Ok(Some(Node::RetCall(call)));
        }

        if let Some(mut id) = self.ident() {
            id.var = Some(self.ctx.lookup_variable(&id.name, id.line)?);
            return Ok(Some(Node::Variable(id)));
        }

        if let Some(v) = self.literal() {
            return Ok(Some(Node::IntLiteral(v as i32)));
        }

        self.attempt(|p| {
            require!(p.eat(TokenKind::Minus));
            let v = require!(p.literal());
            Ok(Some(Node::IntLiteral((v as i32).wrapping_neg())))
        })
    }

    fn numop(&mut self) -> Option<NumOp> {
        let op = match self.peek_kind()? {
            TokenKind::Plus => NumOp::Add,
            TokenKind::Minus => NumOp::Sub,
            TokenKind::Star => NumOp::Mul,
            TokenKind::Slash => NumOp::Div,
            TokenKind::Percent => NumOp::Mod,
            _ => {
                self.miss();
                return None;
            }
        };
        self.pos += 1;
        Some(op)
    }

    fn boolop(&mut self) -> Option<BoolOp> {
        let op = match self.peek_kind()? {
            TokenKind::EqEq => BoolOp::Eq,
            TokenKind::NotEq => BoolOp::Ne,
            TokenKind::Gt => BoolOp::Gt,
            TokenKind::Lt => BoolOp::Lt,
            TokenKind::Ge => BoolOp::Ge,
            TokenKind::Le => BoolOp::Le,
            _ => {
                self.miss();
                return None;
            }
        };
        self.pos += 1;
        Some(op)
    }

    fn condition(&mut self) -> PResult<Node> {
        self.attempt(|p| {
            let lhs = require!(p.expr()?);
            let op = require!(p.boolop());
            let rhs = require!(p.expr()?);
            Ok(Some(Node::Condition {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            }))
        })
    }
}

/// Parses a token stream produced by [`tokenize`](super::lexer::tokenize).
pub fn parse(tokens: &[Token]) -> Result<(Node, CompileContext), CompileError> {
    Parser::new(tokens).parse()
}
