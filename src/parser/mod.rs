pub mod ast;

use crate::diagnostics::CompileError;
use crate::lexer::{lex, token::Token};
use crate::span::{Span, Spanned};
use ast::*;

/// Lex and parse one source module.
pub fn parse_module(source: &str, module_name: &str) -> Result<Module, CompileError> {
    let tokens = lex(source)?;
    let mut parser = Parser::new(&tokens, source);
    parser.parse_module(module_name)
}

pub struct Parser<'a> {
    tokens: &'a [Spanned<Token>],
    source: &'a str,
    pos: usize,
    next_id: u32,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Spanned<Token>], source: &'a str) -> Self {
        Self { tokens, source, pos: 0, next_id: 0 }
    }

    fn peek(&self) -> Option<&Spanned<Token>> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Spanned<Token>> {
        self.tokens.get(self.pos + offset)
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek().is_some_and(|t| std::mem::discriminant(&t.node) == std::mem::discriminant(expected))
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn advance(&mut self) -> Option<&Spanned<Token>> {
        if self.pos < self.tokens.len() {
            let tok = &self.tokens[self.pos];
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span, CompileError> {
        match self.tokens.get(self.pos) {
            Some(tok) if std::mem::discriminant(&tok.node) == std::mem::discriminant(expected) => {
                self.pos += 1;
                Ok(tok.span)
            }
            Some(tok) => Err(CompileError::syntax(
                format!("expected {expected}, found {}", tok.node),
                tok.span,
            )),
            None => Err(CompileError::syntax(
                format!("expected {expected}, found end of file"),
                self.eof_span(),
            )),
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>, CompileError> {
        match self.tokens.get(self.pos) {
            Some(tok) if matches!(tok.node, Token::Ident) => {
                let name = self.source[tok.span.start..tok.span.end].to_string();
                self.pos += 1;
                Ok(Spanned::new(name, tok.span))
            }
            Some(tok) => Err(CompileError::syntax(
                format!("expected identifier, found {}", tok.node),
                tok.span,
            )),
            None => Err(CompileError::syntax(
                "expected identifier, found end of file",
                self.eof_span(),
            )),
        }
    }

    fn eof_span(&self) -> Span {
        if let Some(last) = self.tokens.last() {
            Span::new(last.span.end, last.span.end)
        } else {
            Span::dummy()
        }
    }

    fn current_span(&self) -> Span {
        self.peek().map_or_else(|| self.eof_span(), |t| t.span)
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn node(&mut self, kind: ExprKind, span: Span) -> Spanned<Expr> {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        Spanned::new(Expr { id, kind }, span)
    }

    pub fn parse_module(&mut self, name: &str) -> Result<Module, CompileError> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            if self.eat(&Token::Newline) {
                continue;
            }
            if self.check(&Token::Indent) {
                return Err(CompileError::syntax("unexpected indent", self.current_span()));
            }
            self.parse_statement_into(&mut body)?;
        }
        let docstring = take_docstring(&mut body);
        Ok(Module { name: name.to_string(), docstring, body, node_count: self.next_id })
    }

    /// Parse `: <block>` where the block is either an indented suite or
    /// simple statements on the same line.
    fn parse_block(&mut self) -> Result<Vec<Spanned<Stmt>>, CompileError> {
        self.expect(&Token::Colon)?;
        let mut body = Vec::new();
        if self.eat(&Token::Newline) {
            self.expect(&Token::Indent)?;
            while !self.is_at_end() && !self.check(&Token::Dedent) {
                self.parse_statement_into(&mut body)?;
            }
            self.expect(&Token::Dedent)?;
        } else {
            self.parse_simple_statements(&mut body)?;
        }
        if body.is_empty() {
            return Err(CompileError::syntax("expected an indented block", self.current_span()));
        }
        Ok(body)
    }

    fn parse_statement_into(&mut self, out: &mut Vec<Spanned<Stmt>>) -> Result<(), CompileError> {
        let Some(tok) = self.peek() else {
            return Err(CompileError::syntax("expected statement, found end of file", self.eof_span()));
        };
        match tok.node {
            Token::At | Token::Def | Token::Class => out.push(self.parse_definition()?),
            Token::If => out.push(self.parse_if()?),
            Token::While => out.push(self.parse_while()?),
            Token::For => out.push(self.parse_for()?),
            Token::With => out.push(self.parse_with()?),
            _ => self.parse_simple_statements(out)?,
        }
        Ok(())
    }

    fn parse_simple_statements(&mut self, out: &mut Vec<Spanned<Stmt>>) -> Result<(), CompileError> {
        loop {
            self.parse_simple_statement(out)?;
            if self.eat(&Token::Semicolon) {
                if self.check(&Token::Newline) {
                    break;
                }
                continue;
            }
            break;
        }
        if !self.is_at_end() && !self.check(&Token::Dedent) {
            self.expect(&Token::Newline)?;
        }
        Ok(())
    }

    fn parse_simple_statement(&mut self, out: &mut Vec<Spanned<Stmt>>) -> Result<(), CompileError> {
        let start = self.current_span().start;
        let Some(tok) = self.peek() else {
            return Err(CompileError::syntax("expected statement, found end of file", self.eof_span()));
        };
        let stmt = match tok.node {
            Token::Pass => {
                self.advance();
                Stmt::Pass
            }
            Token::Break => {
                self.advance();
                Stmt::Break
            }
            Token::Continue => {
                self.advance();
                Stmt::Continue
            }
            Token::Return => {
                self.advance();
                if self.at_simple_end() {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.parse_expr_list()?))
                }
            }
            Token::Raise => {
                self.advance();
                if self.at_simple_end() {
                    Stmt::Raise(None)
                } else {
                    Stmt::Raise(Some(self.parse_expr(0)?))
                }
            }
            Token::Del => {
                self.advance();
                Stmt::Del(self.parse_expr(0)?)
            }
            Token::Import => {
                self.advance();
                loop {
                    let item_start = self.current_span().start;
                    let path = self.parse_dotted_name()?;
                    let alias = if self.eat(&Token::As) { Some(self.expect_ident()?) } else { None };
                    out.push(Spanned::new(Stmt::Import { path, alias }, Span::new(item_start, self.prev_end())));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                return Ok(());
            }
            Token::From => {
                self.advance();
                let module = self.parse_dotted_name()?;
                self.expect(&Token::Import)?;
                let parenthesized = self.eat(&Token::LParen);
                let mut names = Vec::new();
                if self.check(&Token::Star) {
                    let span = self.expect(&Token::Star)?;
                    names.push((Spanned::new("*".to_string(), span), None));
                } else {
                    loop {
                        let name = self.expect_ident()?;
                        let alias = if self.eat(&Token::As) { Some(self.expect_ident()?) } else { None };
                        names.push((name, alias));
                        if !self.eat(&Token::Comma) || (parenthesized && self.check(&Token::RParen)) {
                            break;
                        }
                    }
                }
                if parenthesized {
                    self.expect(&Token::RParen)?;
                }
                Stmt::FromImport { module, names }
            }
            _ => self.parse_expression_statement()?,
        };
        out.push(Spanned::new(stmt, Span::new(start, self.prev_end())));
        Ok(())
    }

    fn at_simple_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(t) => matches!(t.node, Token::Newline | Token::Semicolon | Token::Dedent),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, CompileError> {
        let target = self.parse_expr_list()?;
        let Some(tok) = self.peek() else {
            return Ok(Stmt::Expr(target));
        };
        let aug = match tok.node {
            Token::PlusEq => Some(BinOp::Add),
            Token::MinusEq => Some(BinOp::Sub),
            Token::StarEq => Some(BinOp::Mul),
            Token::SlashEq => Some(BinOp::Div),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            check_assign_target(&target)?;
            let value = self.parse_expr_list()?;
            return Ok(Stmt::AugAssign { target, op, value });
        }
        match tok.node {
            Token::Colon => {
                self.advance();
                check_assign_target(&target)?;
                let annotation = self.parse_type()?;
                let value = if self.eat(&Token::Eq) { Some(self.parse_expr_list()?) } else { None };
                Ok(Stmt::Assign { target, annotation: Some(annotation), value })
            }
            Token::Eq => {
                self.advance();
                check_assign_target(&target)?;
                let value = self.parse_expr_list()?;
                if self.check(&Token::Eq) {
                    return Err(CompileError::syntax("chained assignment is not supported", self.current_span()));
                }
                Ok(Stmt::Assign { target, annotation: None, value: Some(value) })
            }
            _ => Ok(Stmt::Expr(target)),
        }
    }

    fn parse_dotted_name(&mut self) -> Result<Vec<Spanned<String>>, CompileError> {
        let mut path = vec![self.expect_ident()?];
        while self.eat(&Token::Dot) {
            path.push(self.expect_ident()?);
        }
        Ok(path)
    }

    fn parse_definition(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.current_span().start;
        let mut decorators = Vec::new();
        while self.eat(&Token::At) {
            let path = self.parse_dotted_name()?;
            let span = path[0].span.to(path[path.len() - 1].span);
            let name = path.iter().map(|p| p.node.as_str()).collect::<Vec<_>>().join(".");
            decorators.push(Spanned::new(name, span));
            self.expect(&Token::Newline)?;
        }
        let stmt = if self.eat(&Token::Def) {
            Stmt::FunctionDef(self.parse_function(decorators)?)
        } else {
            self.expect(&Token::Class)?;
            Stmt::ClassDef(self.parse_class(decorators)?)
        };
        Ok(Spanned::new(stmt, Span::new(start, self.prev_end())))
    }

    fn parse_function(&mut self, decorators: Vec<Spanned<String>>) -> Result<FunctionDef, CompileError> {
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            if self.check(&Token::Star) || self.check(&Token::StarStar) {
                return Err(CompileError::syntax("variadic parameters are not supported", self.current_span()));
            }
            let pname = self.expect_ident()?;
            let annotation = if self.eat(&Token::Colon) { Some(self.parse_type()?) } else { None };
            let default = if self.eat(&Token::Eq) { Some(self.parse_expr(0)?) } else { None };
            params.push(Param { name: pname, annotation, default });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        let returns = if self.eat(&Token::Arrow) { Some(self.parse_type()?) } else { None };
        let mut body = self.parse_block()?;
        let docstring = take_docstring(&mut body);
        Ok(FunctionDef { name, params, returns, body, decorators, docstring })
    }

    fn parse_class(&mut self, decorators: Vec<Spanned<String>>) -> Result<ClassDef, CompileError> {
        let name = self.expect_ident()?;
        let mut bases = Vec::new();
        if self.eat(&Token::LParen) {
            while !self.check(&Token::RParen) {
                bases.push(self.parse_expr(0)?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }
        let mut body = self.parse_block()?;
        let docstring = take_docstring(&mut body);
        Ok(ClassDef { name, bases, body, decorators, docstring })
    }

    fn parse_if(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.current_span().start;
        self.advance(); // `if` or `elif`
        let condition = self.parse_expr(0)?;
        let then_body = self.parse_block()?;
        let else_body = if self.check(&Token::Elif) {
            vec![self.parse_if()?]
        } else if self.eat(&Token::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Spanned::new(
            Stmt::If { condition, then_body, else_body },
            Span::new(start, self.prev_end()),
        ))
    }

    fn parse_while(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.expect(&Token::While)?.start;
        let condition = self.parse_expr(0)?;
        let body = self.parse_block()?;
        if self.check(&Token::Else) {
            return Err(CompileError::syntax("'while ... else' is not supported", self.current_span()));
        }
        Ok(Spanned::new(Stmt::While { condition, body }, Span::new(start, self.prev_end())))
    }

    fn parse_for(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.expect(&Token::For)?.start;
        let first = self.parse_for_name()?;
        let target = if self.check(&Token::Comma) {
            let mut items = vec![first];
            while self.eat(&Token::Comma) {
                if self.check(&Token::In) {
                    break;
                }
                items.push(self.parse_for_name()?);
            }
            let span = items[0].span.to(items[items.len() - 1].span);
            self.node(ExprKind::Tuple(items), span)
        } else {
            first
        };
        self.expect(&Token::In)?;
        let iterable = self.parse_expr_list()?;
        let body = self.parse_block()?;
        if self.check(&Token::Else) {
            return Err(CompileError::syntax("'for ... else' is not supported", self.current_span()));
        }
        Ok(Spanned::new(Stmt::For { target, iterable, body }, Span::new(start, self.prev_end())))
    }

    fn parse_for_name(&mut self) -> Result<Spanned<Expr>, CompileError> {
        if self.eat(&Token::LParen) {
            let start = self.prev_end() - 1;
            let mut items = Vec::new();
            while !self.check(&Token::RParen) {
                items.push(self.parse_for_name()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
            return Ok(self.node(ExprKind::Tuple(items), Span::new(start, self.prev_end())));
        }
        let name = self.expect_ident()?;
        Ok(self.node(ExprKind::Name(name.node), name.span))
    }

    fn parse_with(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.expect(&Token::With)?.start;
        let context = self.parse_expr(0)?;
        let binding = if self.eat(&Token::As) { Some(self.expect_ident()?) } else { None };
        let body = self.parse_block()?;
        Ok(Spanned::new(Stmt::With { context, binding, body }, Span::new(start, self.prev_end())))
    }

    /// Annotation: `Name`, `a.b.Name`, `Name[T, ...]`, `None`, or a string
    /// literal holding one of those with `*`, `&` and `const` decorations.
    fn parse_type(&mut self) -> Result<Spanned<TypeExpr>, CompileError> {
        let Some(tok) = self.peek() else {
            return Err(CompileError::syntax("expected type, found end of file", self.eof_span()));
        };
        let span = tok.span;
        match &tok.node {
            Token::StringLit(text) => {
                let text = text.clone();
                self.advance();
                parse_type_str(&text, span)
            }
            Token::None => {
                self.advance();
                Ok(Spanned::new(TypeExpr::Named("None".to_string()), span))
            }
            Token::Ident => {
                let path = self.parse_dotted_name()?;
                let name = path.iter().map(|p| p.node.as_str()).collect::<Vec<_>>().join(".");
                if self.eat(&Token::LBracket) {
                    let mut args = Vec::new();
                    while !self.check(&Token::RBracket) {
                        if self.check(&Token::LBracket) {
                            // Callable[[A, B], R]
                            let inner_start = self.current_span().start;
                            self.advance();
                            let mut inner = Vec::new();
                            while !self.check(&Token::RBracket) {
                                inner.push(self.parse_type()?);
                                if !self.eat(&Token::Comma) {
                                    break;
                                }
                            }
                            self.expect(&Token::RBracket)?;
                            args.push(Spanned::new(
                                TypeExpr::Generic { name: "[]".to_string(), args: inner },
                                Span::new(inner_start, self.prev_end()),
                            ));
                        } else {
                            args.push(self.parse_type()?);
                        }
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RBracket)?;
                    Ok(Spanned::new(TypeExpr::Generic { name, args }, Span::new(span.start, self.prev_end())))
                } else {
                    Ok(Spanned::new(TypeExpr::Named(name), Span::new(span.start, self.prev_end())))
                }
            }
            other => Err(CompileError::syntax(format!("expected type, found {other}"), span)),
        }
    }

    /// Comma-separated expressions; two or more (or a trailing comma) form a
    /// tuple.
    fn parse_expr_list(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let first = self.parse_expr(0)?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let start = first.span.start;
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.at_simple_end() || self.check(&Token::Eq) || self.check(&Token::Colon) {
                break;
            }
            items.push(self.parse_expr(0)?);
        }
        Ok(self.node(ExprKind::Tuple(items), Span::new(start, self.prev_end())))
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Spanned<Expr>, CompileError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let Some(op) = self.peek_infix() else { break };
            let (l_bp, r_bp) = op.binding_power();
            if l_bp < min_bp {
                break;
            }
            let op_span = self.current_span();
            self.advance();
            if matches!(op, Infix::Cmp(CmpOp::NotIn)) || matches!(op, Infix::Cmp(CmpOp::IsNot)) {
                self.advance();
            }
            let rhs = self.parse_expr(r_bp)?;
            let span = lhs.span.to(rhs.span);
            let kind = match op {
                Infix::Bin(op) => ExprKind::BinOp { op, left: Box::new(lhs), right: Box::new(rhs) },
                Infix::Bool(op) => ExprKind::BoolOp { op, left: Box::new(lhs), right: Box::new(rhs) },
                Infix::Cmp(op) => {
                    if matches!(self.peek_infix(), Some(Infix::Cmp(_))) {
                        return Err(CompileError::syntax("chained comparisons are not supported", op_span));
                    }
                    ExprKind::Compare { op, left: Box::new(lhs), right: Box::new(rhs) }
                }
            };
            lhs = self.node(kind, span);
        }

        Ok(lhs)
    }

    fn peek_infix(&self) -> Option<Infix> {
        let tok = self.peek()?;
        let op = match tok.node {
            Token::Or => Infix::Bool(BoolOp::Or),
            Token::And => Infix::Bool(BoolOp::And),
            Token::EqEq => Infix::Cmp(CmpOp::Eq),
            Token::BangEq => Infix::Cmp(CmpOp::NotEq),
            Token::Lt => Infix::Cmp(CmpOp::Lt),
            Token::LtEq => Infix::Cmp(CmpOp::LtEq),
            Token::Gt => Infix::Cmp(CmpOp::Gt),
            Token::GtEq => Infix::Cmp(CmpOp::GtEq),
            Token::In => Infix::Cmp(CmpOp::In),
            Token::Not if self.peek_at(1).is_some_and(|t| matches!(t.node, Token::In)) => Infix::Cmp(CmpOp::NotIn),
            Token::Is if self.peek_at(1).is_some_and(|t| matches!(t.node, Token::Not)) => Infix::Cmp(CmpOp::IsNot),
            Token::Is => Infix::Cmp(CmpOp::Is),
            Token::Plus => Infix::Bin(BinOp::Add),
            Token::Minus => Infix::Bin(BinOp::Sub),
            Token::Star => Infix::Bin(BinOp::Mul),
            Token::Slash => Infix::Bin(BinOp::Div),
            Token::SlashSlash => Infix::Bin(BinOp::FloorDiv),
            Token::Percent => Infix::Bin(BinOp::Mod),
            Token::StarStar => Infix::Bin(BinOp::Pow),
            _ => return None,
        };
        Some(op)
    }

    fn parse_prefix(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let start = self.current_span();
        if self.eat(&Token::Not) {
            let operand = self.parse_expr(NOT_BP)?;
            let span = start.to(operand.span);
            return Ok(self.node(ExprKind::UnaryOp { op: UnaryOp::Not, operand: Box::new(operand) }, span));
        }
        let unary = if self.check(&Token::Minus) {
            Some(UnaryOp::Neg)
        } else if self.check(&Token::Plus) {
            Some(UnaryOp::Pos)
        } else {
            None
        };
        if let Some(op) = unary {
            self.advance();
            let operand = self.parse_expr(UNARY_BP)?;
            let span = start.to(operand.span);
            return Ok(self.node(ExprKind::UnaryOp { op, operand: Box::new(operand) }, span));
        }
        let atom = self.parse_atom()?;
        self.parse_postfix(atom)
    }

    fn parse_postfix(&mut self, mut expr: Spanned<Expr>) -> Result<Spanned<Expr>, CompileError> {
        loop {
            if self.eat(&Token::Dot) {
                let attr = self.expect_ident()?;
                let span = expr.span.to(attr.span);
                expr = self.node(ExprKind::Attribute { value: Box::new(expr), attr }, span);
            } else if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                while !self.check(&Token::RParen) {
                    if self.check(&Token::Ident) && self.peek_at(1).is_some_and(|t| matches!(t.node, Token::Eq)) {
                        return Err(CompileError::syntax("keyword arguments are not supported", self.current_span()));
                    }
                    if self.check(&Token::Star) || self.check(&Token::StarStar) {
                        return Err(CompileError::syntax("argument unpacking is not supported", self.current_span()));
                    }
                    args.push(self.parse_expr(0)?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                let close = self.expect(&Token::RParen)?;
                let span = expr.span.to(close);
                expr = self.node(ExprKind::Call { func: Box::new(expr), args }, span);
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_expr_list()?;
                if self.check(&Token::Colon) {
                    return Err(CompileError::syntax("slices are not supported", self.current_span()));
                }
                let close = self.expect(&Token::RBracket)?;
                let span = expr.span.to(close);
                expr = self.node(ExprKind::Subscript { value: Box::new(expr), index: Box::new(index) }, span);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let Some(tok) = self.peek() else {
            return Err(CompileError::syntax("expected expression, found end of file", self.eof_span()));
        };
        let span = tok.span;
        let kind = match &tok.node {
            Token::IntLit(n) => {
                let n = *n;
                self.advance();
                ExprKind::Int(n)
            }
            Token::FloatLit(f) => {
                let f = *f;
                self.advance();
                ExprKind::Float(f)
            }
            Token::StringLit(_) => {
                let mut text = String::new();
                let mut end = span;
                while let Some(Spanned { node: Token::StringLit(s), span }) = self.peek() {
                    text.push_str(s);
                    end = *span;
                    self.advance();
                }
                return Ok(self.node(ExprKind::Str(text), span.to(end)));
            }
            Token::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            Token::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            Token::None => {
                self.advance();
                ExprKind::NoneLit
            }
            Token::Ident => {
                let name = self.expect_ident()?;
                ExprKind::Name(name.node)
            }
            Token::LParen => {
                self.advance();
                if self.eat(&Token::RParen) {
                    return Ok(self.node(ExprKind::Tuple(Vec::new()), Span::new(span.start, self.prev_end())));
                }
                let inner = self.parse_expr(0)?;
                if self.check(&Token::Comma) {
                    let mut items = vec![inner];
                    while self.eat(&Token::Comma) {
                        if self.check(&Token::RParen) {
                            break;
                        }
                        items.push(self.parse_expr(0)?);
                    }
                    self.expect(&Token::RParen)?;
                    return Ok(self.node(ExprKind::Tuple(items), Span::new(span.start, self.prev_end())));
                }
                self.expect(&Token::RParen)?;
                return Ok(Spanned::new(inner.node, Span::new(span.start, self.prev_end())));
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_expr(0)?);
                    if self.check(&Token::For) {
                        return Err(CompileError::syntax("comprehensions are not supported", self.current_span()));
                    }
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                ExprKind::List(items)
            }
            Token::LBrace => {
                self.advance();
                if self.eat(&Token::RBrace) {
                    return Ok(self.node(ExprKind::Dict(Vec::new()), Span::new(span.start, self.prev_end())));
                }
                let first = self.parse_expr(0)?;
                let kind = if self.eat(&Token::Colon) {
                    let value = self.parse_expr(0)?;
                    let mut entries = vec![(first, value)];
                    while self.eat(&Token::Comma) {
                        if self.check(&Token::RBrace) {
                            break;
                        }
                        let k = self.parse_expr(0)?;
                        self.expect(&Token::Colon)?;
                        let v = self.parse_expr(0)?;
                        entries.push((k, v));
                    }
                    ExprKind::Dict(entries)
                } else {
                    let mut items = vec![first];
                    while self.eat(&Token::Comma) {
                        if self.check(&Token::RBrace) {
                            break;
                        }
                        items.push(self.parse_expr(0)?);
                    }
                    ExprKind::Set(items)
                };
                self.expect(&Token::RBrace)?;
                kind
            }
            other => {
                return Err(CompileError::syntax(format!("expected expression, found {other}"), span));
            }
        };
        Ok(self.node(kind, Span::new(span.start, self.prev_end())))
    }
}

#[derive(Debug, Clone, Copy)]
enum Infix {
    Bin(BinOp),
    Bool(BoolOp),
    Cmp(CmpOp),
}

const NOT_BP: u8 = 5;
const UNARY_BP: u8 = 13;

impl Infix {
    fn binding_power(self) -> (u8, u8) {
        match self {
            Infix::Bool(BoolOp::Or) => (1, 2),
            Infix::Bool(BoolOp::And) => (3, 4),
            Infix::Cmp(_) => (7, 8),
            Infix::Bin(BinOp::Add | BinOp::Sub) => (9, 10),
            Infix::Bin(BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod) => (11, 12),
            Infix::Bin(BinOp::Pow) => (15, 14),
        }
    }
}

fn check_assign_target(target: &Spanned<Expr>) -> Result<(), CompileError> {
    match &target.node.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Tuple(items) => items.iter().try_for_each(check_assign_target),
        _ => Err(CompileError::syntax("cannot assign to expression", target.span)),
    }
}

fn take_docstring(body: &mut Vec<Spanned<Stmt>>) -> Option<String> {
    let is_doc = matches!(
        body.first(),
        Some(Spanned { node: Stmt::Expr(Spanned { node: Expr { kind: ExprKind::Str(_), .. }, .. }), .. })
    );
    if !is_doc {
        return None;
    }
    let first = body.remove(0);
    if body.is_empty() {
        body.push(Spanned::new(Stmt::Pass, first.span));
    }
    match first.node {
        Stmt::Expr(Spanned { node: Expr { kind: ExprKind::Str(s), .. }, .. }) => Some(s),
        _ => None,
    }
}

/// Parse the text of a string annotation such as `'Expression*'`,
/// `'Point const&'` or `'Dict[str, Expression*]'`.
fn parse_type_str(text: &str, span: Span) -> Result<Spanned<TypeExpr>, CompileError> {
    let cleaned: String = text
        .replace("const", " ")
        .chars()
        .filter(|c| !matches!(c, '*' | '&') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Err(CompileError::syntax("empty type annotation", span));
    }
    let Some(open) = cleaned.find('[') else {
        return Ok(Spanned::new(TypeExpr::Named(cleaned), span));
    };
    if !cleaned.ends_with(']') {
        return Err(CompileError::syntax(format!("malformed type annotation '{text}'"), span));
    }
    let name = cleaned[..open].to_string();
    let inner = &cleaned[open + 1..cleaned.len() - 1];
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut piece_start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(parse_type_str(&inner[piece_start..i], span)?);
                piece_start = i + 1;
            }
            _ => {}
        }
    }
    if piece_start < inner.len() {
        args.push(parse_type_str(&inner[piece_start..], span)?);
    }
    Ok(Spanned::new(TypeExpr::Generic { name, args }, span))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Module {
        parse_module(src, "test").unwrap()
    }

    fn first_expr(src: &str) -> Expr {
        let module = parse(src);
        match module.body.into_iter().next().map(|s| s.node) {
            Some(Stmt::Expr(e)) => e.node,
            Some(Stmt::Assign { value: Some(v), .. }) => v.node,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn parse_assignment() {
        let module = parse("x = 1\n");
        assert_eq!(module.body.len(), 1);
        match &module.body[0].node {
            Stmt::Assign { target, annotation, value } => {
                assert_eq!(target.node.name(), Some("x"));
                assert!(annotation.is_none());
                assert!(matches!(value.as_ref().unwrap().node.kind, ExprKind::Int(1)));
            }
            other => panic!("expected assign, got {other:?}"),
        }
    }

    #[test]
    fn parse_operator_precedence() {
        let e = first_expr("x = 1 + 2 * 3\n");
        match e.kind {
            ExprKind::BinOp { op: BinOp::Add, right, .. } => {
                assert!(matches!(right.node.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn parse_power_binds_tighter_than_negation() {
        let e = first_expr("y = -x ** 2\n");
        match e.kind {
            ExprKind::UnaryOp { op: UnaryOp::Neg, operand } => {
                assert!(matches!(operand.node.kind, ExprKind::BinOp { op: BinOp::Pow, .. }));
            }
            other => panic!("expected negation, got {other:?}"),
        }
    }

    #[test]
    fn parse_power_is_right_associative() {
        let e = first_expr("y = a ** b ** c\n");
        match e.kind {
            ExprKind::BinOp { op: BinOp::Pow, left, right } => {
                assert_eq!(left.node.name(), Some("a"));
                assert!(matches!(right.node.kind, ExprKind::BinOp { op: BinOp::Pow, .. }));
            }
            other => panic!("expected pow, got {other:?}"),
        }
    }

    #[test]
    fn parse_not_in_and_is_not() {
        assert!(matches!(first_expr("a not in b\n").kind, ExprKind::Compare { op: CmpOp::NotIn, .. }));
        assert!(matches!(first_expr("a is not None\n").kind, ExprKind::Compare { op: CmpOp::IsNot, .. }));
        assert!(matches!(
            first_expr("not a == b\n").kind,
            ExprKind::UnaryOp { op: UnaryOp::Not, .. }
        ));
    }

    #[test]
    fn parse_boolean_precedence() {
        let e = first_expr("a or b and c\n");
        match e.kind {
            ExprKind::BoolOp { op: BoolOp::Or, right, .. } => {
                assert!(matches!(right.node.kind, ExprKind::BoolOp { op: BoolOp::And, .. }));
            }
            other => panic!("expected or, got {other:?}"),
        }
    }

    #[test]
    fn parse_function_with_defaults_and_docstring() {
        let module = parse("def f(a, b: int = 2) -> int:\n    \"\"\"doc\"\"\"\n    return a + b\n");
        let Stmt::FunctionDef(f) = &module.body[0].node else { panic!("expected def") };
        assert_eq!(f.name.node, "f");
        assert_eq!(f.params.len(), 2);
        assert!(f.params[1].default.is_some());
        assert_eq!(f.params[1].annotation.as_ref().unwrap().node, TypeExpr::Named("int".into()));
        assert_eq!(f.docstring.as_deref(), Some("doc"));
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn parse_class_with_bases_and_decorated_method() {
        let src = "class Add(BinaryOperator):\n    @abstract\n    def visit(self):\n        raise NotImplemented\n";
        let module = parse(src);
        let Stmt::ClassDef(c) = &module.body[0].node else { panic!("expected class") };
        assert_eq!(c.name.node, "Add");
        assert_eq!(c.bases.len(), 1);
        let Stmt::FunctionDef(m) = &c.body[0].node else { panic!("expected method") };
        assert!(m.has_decorator("abstract"));
        assert!(matches!(m.body[0].node, Stmt::Raise(Some(_))));
    }

    #[test]
    fn parse_elif_chain_nests() {
        let module = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let Stmt::If { else_body, .. } = &module.body[0].node else { panic!("expected if") };
        assert_eq!(else_body.len(), 1);
        let Stmt::If { else_body: inner_else, .. } = &else_body[0].node else { panic!("expected elif") };
        assert_eq!(inner_else.len(), 1);
    }

    #[test]
    fn parse_for_tuple_target() {
        let module = parse("for k, v in d.items():\n    pass\n");
        let Stmt::For { target, .. } = &module.body[0].node else { panic!("expected for") };
        assert!(matches!(&target.node.kind, ExprKind::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn parse_tuple_unpacking_assignment() {
        let module = parse("a, b = reorder(x, y)\n");
        let Stmt::Assign { target, .. } = &module.body[0].node else { panic!("expected assign") };
        assert!(matches!(&target.node.kind, ExprKind::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn parse_container_literals() {
        assert!(matches!(first_expr("x = [1, 2, 3]\n").kind, ExprKind::List(ref v) if v.len() == 3));
        assert!(matches!(first_expr("x = {}\n").kind, ExprKind::Dict(ref v) if v.is_empty()));
        assert!(matches!(first_expr("x = {'a': 1}\n").kind, ExprKind::Dict(ref v) if v.len() == 1));
        assert!(matches!(first_expr("x = {1, 2}\n").kind, ExprKind::Set(ref v) if v.len() == 2));
        assert!(matches!(first_expr("x = (1, 2)\n").kind, ExprKind::Tuple(ref v) if v.len() == 2));
    }

    #[test]
    fn parse_string_annotations() {
        let module = parse("def f(a: 'Expression*', b: 'Point const&') -> 'Dict[str, Expression*]':\n    pass\n");
        let Stmt::FunctionDef(f) = &module.body[0].node else { panic!("expected def") };
        assert_eq!(f.params[0].annotation.as_ref().unwrap().node, TypeExpr::Named("Expression".into()));
        assert_eq!(f.params[1].annotation.as_ref().unwrap().node, TypeExpr::Named("Point".into()));
        match &f.returns.as_ref().unwrap().node {
            TypeExpr::Generic { name, args } => {
                assert_eq!(name, "Dict");
                assert_eq!(args[0].node, TypeExpr::Named("str".into()));
                assert_eq!(args[1].node, TypeExpr::Named("Expression".into()));
            }
            other => panic!("expected generic, got {other:?}"),
        }
    }

    #[test]
    fn parse_imports() {
        let module = parse("import math\nfrom a.b import c as d, e\nimport x.y as z\n");
        assert!(matches!(&module.body[0].node, Stmt::Import { path, alias: None } if path.len() == 1));
        match &module.body[1].node {
            Stmt::FromImport { module, names } => {
                assert_eq!(module.len(), 2);
                assert_eq!(names.len(), 2);
                assert_eq!(names[0].1.as_ref().unwrap().node, "d");
            }
            other => panic!("expected from-import, got {other:?}"),
        }
        assert!(matches!(&module.body[2].node, Stmt::Import { alias: Some(a), .. } if a.node == "z"));
    }

    #[test]
    fn parse_with_statement() {
        let module = parse("with open_scope() as s:\n    s.run()\n");
        assert!(matches!(&module.body[0].node, Stmt::With { binding: Some(b), .. } if b.node == "s"));
    }

    #[test]
    fn parse_single_line_block() {
        let module = parse("if x: return 1\n");
        let Stmt::If { then_body, .. } = &module.body[0].node else { panic!("expected if") };
        assert!(matches!(then_body[0].node, Stmt::Return(Some(_))));
    }

    #[test]
    fn node_ids_are_unique() {
        let module = parse("x = a + b * c\ny = f(x, 1)\n");
        assert!(module.node_count >= 9);
        let mut seen = std::collections::HashSet::new();
        fn walk(e: &Spanned<Expr>, seen: &mut std::collections::HashSet<NodeId>) {
            assert!(seen.insert(e.node.id), "duplicate id {:?}", e.node.id);
            match &e.node.kind {
                ExprKind::BinOp { left, right, .. } => {
                    walk(left, seen);
                    walk(right, seen);
                }
                ExprKind::Call { func, args } => {
                    walk(func, seen);
                    args.iter().for_each(|a| walk(a, seen));
                }
                _ => {}
            }
        }
        for stmt in &module.body {
            if let Stmt::Assign { target, value: Some(v), .. } = &stmt.node {
                walk(target, &mut seen);
                walk(v, &mut seen);
            }
        }
        assert_eq!(seen.len(), 11);
    }

    #[test]
    fn parse_rejects_keyword_arguments() {
        let err = parse_module("f(a=1)\n", "m").unwrap_err();
        assert!(err.to_string().contains("keyword arguments"));
    }

    #[test]
    fn parse_rejects_chained_comparison() {
        let err = parse_module("x = a < b < c\n", "m").unwrap_err();
        assert!(err.to_string().contains("chained comparisons"));
    }

    #[test]
    fn parse_rejects_bad_assign_target() {
        assert!(parse_module("f() = 1\n", "m").is_err());
    }

    #[test]
    fn parse_rejects_unexpected_indent() {
        assert!(parse_module("    x = 1\n", "m").is_err());
    }
}
