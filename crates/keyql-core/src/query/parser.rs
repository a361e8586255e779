//! Precedence-climbing parser producing checked statements.

use std::rc::Rc;

use crate::error::{KeyqlError, Result};
use crate::query::ast::{
    new_result_slot, DeleteStmt, Expr, FieldKeyword, GroupByField, GroupByStmt, LimitStmt,
    Operator, OrderField, OrderStmt, PutPair, PutStmt, RemoveStmt, SelectStmt, SortOrder,
    Statement, ValueType, WhereStmt,
};
use crate::query::check::{check_no_nested_aggr, CheckCtx};
use crate::query::lexer::{Lexer, Token, TokenKind, LOWEST_PREC};

/// Hard cap on expression nesting; adversarial input fails instead of
/// blowing the stack.
pub const MAX_NEST_LEVEL: usize = 100_000;

pub struct Parser {
    pub query: String,
    toks: Vec<Token>,
    pos: usize,
    nest_lev: usize,
}

impl Parser {
    pub fn new(query: &str) -> Self {
        let toks = Lexer::new(query).tokenize();
        Parser {
            query: query.to_string(),
            toks,
            pos: 0,
            nest_lev: 0,
        }
    }

    fn cur(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn cur_kind(&self) -> Option<TokenKind> {
        self.cur().map(|t| t.kind)
    }

    fn cur_pos(&self) -> Option<usize> {
        self.cur().map(|t| t.pos)
    }

    fn advance(&mut self) {
        if self.pos < self.toks.len() {
            self.pos += 1;
        }
    }

    fn inc_nest(&mut self) -> Result<()> {
        self.nest_lev += 1;
        if self.nest_lev > MAX_NEST_LEVEL {
            return Err(KeyqlError::syntax(
                self.cur_pos(),
                "exceed max nesting depth",
            ));
        }
        Ok(())
    }

    fn dec_nest(&mut self, n: usize) {
        self.nest_lev = self.nest_lev.saturating_sub(n);
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        match self.cur() {
            None => Err(KeyqlError::syntax(
                None,
                format!("Expect token {what} but got EOF"),
            )),
            Some(tok) if tok.kind == kind => {
                let tok = tok.clone();
                self.advance();
                Ok(tok)
            }
            Some(tok) => Err(KeyqlError::syntax(
                tok.pos,
                format!("Expect token {what} but got {}", tok.lexeme),
            )),
        }
    }

    fn drop_trailing_semis(&mut self) {
        while matches!(self.toks.last().map(|t| t.kind), Some(TokenKind::Semi)) {
            self.toks.pop();
        }
    }

    /// Parse one statement and run its semantic checks.
    pub fn parse(&mut self) -> Result<Statement> {
        self.drop_trailing_semis();
        match self.cur_kind() {
            None => Err(KeyqlError::syntax(None, "Expect select or where keyword")),
            Some(TokenKind::Put) => self.parse_put().map(Statement::Put),
            Some(TokenKind::Remove) => self.parse_remove().map(Statement::Remove),
            Some(TokenKind::Delete) => self.parse_delete().map(Statement::Delete),
            Some(TokenKind::Select) | Some(TokenKind::Where) => {
                self.parse_query().map(Statement::Select)
            }
            Some(_) => Err(KeyqlError::syntax(
                self.cur_pos(),
                "Expect put, remove, delete, select or where keyword",
            )),
        }
    }

    /// `select …` or the bare-`where` shorthand for `select *`.
    fn parse_query(&mut self) -> Result<SelectStmt> {
        let mut stmt = if self.cur_kind() == Some(TokenKind::Select) {
            self.parse_select()?
        } else {
            implicit_select_all(self.cur_pos().unwrap_or(0))
        };

        let where_stmt = if self.cur_kind() == Some(TokenKind::Where) {
            let wpos = self.cur_pos().unwrap_or(0);
            self.advance();
            if self.cur().is_none() {
                return Err(KeyqlError::syntax(None, "Expect where statement"));
            }
            let expr = self.parse_expr()?;
            WhereStmt { pos: wpos, expr }
        } else {
            // WHERE is optional: no predicate means every row matches.
            WhereStmt {
                pos: stmt.pos,
                expr: Expr::BoolLit {
                    pos: stmt.pos,
                    value: true,
                },
            }
        };

        let check_ctx = CheckCtx {
            fields: stmt.fields.clone(),
            field_names: stmt.field_names.clone(),
            field_types: stmt.field_types.clone(),
            ..Default::default()
        };

        let mut order: Option<OrderStmt> = None;
        let mut group_by: Option<GroupByStmt> = None;
        let mut limit: Option<LimitStmt> = None;
        loop {
            let (kind, tok_pos) = match self.cur() {
                Some(tok) => (tok.kind, tok.pos),
                None => break,
            };
            match kind {
                TokenKind::Order => {
                    if order.is_some() {
                        return Err(KeyqlError::syntax(
                            tok_pos,
                            "Duplicate order by expression",
                        ));
                    }
                    let parsed = self.parse_order_by(&stmt)?;
                    if parsed.orders.is_empty() {
                        return Err(KeyqlError::syntax(parsed.pos, "Require order by fields"));
                    }
                    order = Some(parsed);
                }
                TokenKind::Group => {
                    if group_by.is_some() {
                        return Err(KeyqlError::syntax(
                            tok_pos,
                            "Duplicate group by expression",
                        ));
                    }
                    let parsed = self.parse_group_by(&stmt, &check_ctx)?;
                    if parsed.fields.is_empty() {
                        return Err(KeyqlError::syntax(parsed.pos, "Require group by fields"));
                    }
                    group_by = Some(parsed);
                }
                TokenKind::Limit => {
                    if limit.is_some() {
                        return Err(KeyqlError::syntax(tok_pos, "Duplicate limit expression"));
                    }
                    limit = Some(self.parse_limit()?);
                    if let Some(extra) = self.cur() {
                        return Err(KeyqlError::syntax(
                            extra.pos,
                            "Has more expression in limit expression",
                        ));
                    }
                }
                _ => {
                    return Err(KeyqlError::syntax(tok_pos, "Missing operator"));
                }
            }
        }

        let mut where_stmt = where_stmt;
        where_stmt.expr.check(&check_ctx)?;
        if where_stmt.expr.return_type() != ValueType::Bool {
            return Err(KeyqlError::syntax(
                where_stmt.expr.pos(),
                "where statement result type should be boolean",
            ));
        }

        stmt.where_stmt = where_stmt;
        stmt.order = order;
        stmt.group_by = group_by;
        stmt.limit = limit;
        validate_select_fields(&mut stmt, &check_ctx)?;
        Ok(stmt)
    }

    fn parse_select(&mut self) -> Result<SelectStmt> {
        let pos = self.cur_pos().unwrap_or(0);
        self.expect(TokenKind::Select, "select")?;
        let mut fields: Vec<Expr> = Vec::new();
        let mut field_names: Vec<String> = Vec::new();
        let mut all_fields = false;

        loop {
            match self.cur() {
                None => break,
                Some(tok) if is_clause_start(tok.kind) => break,
                Some(tok) if tok.kind == TokenKind::Operator && tok.lexeme == "*" => {
                    let star_pos = tok.pos;
                    if !fields.is_empty() {
                        return Err(KeyqlError::syntax(star_pos, "Invalid field expression"));
                    }
                    all_fields = true;
                    self.advance();
                    match self.cur() {
                        None => break,
                        Some(t) if is_clause_start(t.kind) => break,
                        Some(t) => {
                            return Err(KeyqlError::syntax(t.pos, "Invalid field expression"));
                        }
                    }
                }
                Some(_) => {
                    if all_fields {
                        return Err(KeyqlError::syntax(
                            self.cur_pos(),
                            "Invalid field expression",
                        ));
                    }
                    let field = self.parse_expr()?;
                    let mut field_name = field.to_string();
                    match self.cur() {
                        Some(tok) if tok.kind == TokenKind::As => {
                            self.advance();
                            match self.cur() {
                                None => {
                                    return Err(KeyqlError::syntax(None, "Require field name"));
                                }
                                Some(t) if t.kind == TokenKind::Name => {
                                    field_name = t.lexeme.clone();
                                    self.advance();
                                }
                                Some(t) => {
                                    return Err(KeyqlError::syntax(t.pos, "Invalid field name"));
                                }
                            }
                        }
                        _ => {}
                    }
                    fields.push(field);
                    field_names.push(field_name);
                    match self.cur() {
                        None => break,
                        Some(tok) if tok.kind == TokenKind::Sep => self.advance(),
                        Some(tok) if is_clause_start(tok.kind) => break,
                        Some(tok) => {
                            return Err(KeyqlError::syntax(
                                tok.pos,
                                format!("Expect `as` or `,` but got {}", tok.lexeme),
                            ));
                        }
                    }
                }
            }
        }

        if fields.is_empty() && !all_fields {
            return Err(KeyqlError::syntax(pos, "Empty fields in select statement"));
        }
        if all_fields {
            return Ok(implicit_select_all(pos));
        }
        let field_types = fields.iter().map(|f| f.return_type()).collect();
        Ok(SelectStmt {
            pos,
            all_fields: false,
            fields: fields.into_iter().map(Rc::new).collect(),
            field_names,
            field_types,
            where_stmt: WhereStmt {
                pos,
                expr: Expr::BoolLit { pos, value: true },
            },
            order: None,
            group_by: None,
            limit: None,
        })
    }

    fn parse_limit(&mut self) -> Result<LimitStmt> {
        let pos = self.cur_pos().unwrap_or(0);
        self.expect(TokenKind::Limit, "limit")?;
        let mut numbers: Vec<i64> = Vec::new();
        loop {
            match self.cur() {
                Some(tok) if tok.kind == TokenKind::Number => {
                    numbers.push(tok.lexeme.parse().unwrap_or(0));
                    self.advance();
                }
                Some(tok) if tok.kind == TokenKind::Sep => {
                    let sep_pos = tok.pos;
                    self.advance();
                    match self.cur() {
                        None => {
                            return Err(KeyqlError::syntax(
                                sep_pos,
                                "Invalid limit parameters after separator",
                            ));
                        }
                        Some(t) if t.kind != TokenKind::Number => {
                            return Err(KeyqlError::syntax(
                                t.pos,
                                "Invalid limit parameters after separator, require number",
                            ));
                        }
                        _ => {}
                    }
                }
                _ => break,
            }
        }
        match numbers.len() {
            0 => Err(KeyqlError::syntax(
                self.cur_pos(),
                "Invalid limit parameters",
            )),
            1 => Ok(LimitStmt {
                pos,
                start: 0,
                count: numbers[0].max(0) as usize,
            }),
            2 => Ok(LimitStmt {
                pos,
                start: numbers[0].max(0) as usize,
                count: numbers[1].max(0) as usize,
            }),
            _ => Err(KeyqlError::syntax(
                self.cur_pos(),
                "Too many limit parameters",
            )),
        }
    }

    fn parse_order_by(&mut self, stmt: &SelectStmt) -> Result<OrderStmt> {
        let pos = self.cur_pos().unwrap_or(0);
        self.expect(TokenKind::Order, "order")?;
        self.expect(TokenKind::By, "by")?;
        let mut orders = Vec::new();
        let mut should_break = false;
        while self.cur().is_some() && !should_break {
            let field = self.parse_expr()?;
            let field_name = match &field {
                Expr::Name { name, .. } => name.clone(),
                other => other.to_string(),
            };
            let fexpr = find_field_in_select(stmt, &field_name, field.pos())?;
            let mut of = OrderField {
                name: field_name,
                field: fexpr,
                order: SortOrder::Asc,
            };
            match self.cur_kind() {
                Some(TokenKind::Sep) => self.advance(),
                Some(TokenKind::Asc) | Some(TokenKind::Desc) => {
                    if self.cur_kind() == Some(TokenKind::Desc) {
                        of.order = SortOrder::Desc;
                    }
                    self.advance();
                    if self.cur_kind() == Some(TokenKind::Sep) {
                        self.advance();
                    } else {
                        should_break = true;
                    }
                }
                _ => should_break = true,
            }
            orders.push(of);
        }
        Ok(OrderStmt { pos, orders })
    }

    fn parse_group_by(&mut self, stmt: &SelectStmt, ctx: &CheckCtx) -> Result<GroupByStmt> {
        let pos = self.cur_pos().unwrap_or(0);
        self.expect(TokenKind::Group, "group")?;
        self.expect(TokenKind::By, "by")?;
        let mut fields: Vec<GroupByField> = Vec::new();
        let mut should_break = false;
        while self.cur().is_some() && !should_break {
            let field = self.parse_expr()?;
            match &field {
                Expr::Name { name, pos } => {
                    let fexpr = find_field_in_select(stmt, name, *pos)?;
                    fields.push(GroupByField {
                        name: name.clone(),
                        expr: fexpr,
                    });
                }
                Expr::Field { .. } => {
                    fields.push(GroupByField {
                        name: field.to_string(),
                        expr: Rc::new(field.clone()),
                    });
                }
                Expr::Call { .. } => {
                    let rendered = field.to_string();
                    let fexpr = find_field_in_select(stmt, &rendered, field.pos())?;
                    if let Some(fname) = field.call_name() {
                        if crate::func::is_aggr_function(&fname) {
                            return Err(KeyqlError::syntax(
                                fexpr.pos(),
                                format!("Cannot group by aggregate function: {fname}"),
                            ));
                        }
                    }
                    fields.push(GroupByField {
                        name: rendered,
                        expr: fexpr,
                    });
                }
                other => {
                    let rendered = other.to_string();
                    let fexpr = find_field_in_select(stmt, &rendered, other.pos())?;
                    fields.push(GroupByField {
                        name: rendered,
                        expr: fexpr,
                    });
                }
            }
            match self.cur_kind() {
                Some(TokenKind::Sep) => self.advance(),
                _ => should_break = true,
            }
        }
        for f in &fields {
            let mut expr = (*f.expr).clone();
            expr.check(ctx)?;
        }
        Ok(GroupByStmt { pos, fields })
    }

    fn parse_put(&mut self) -> Result<PutStmt> {
        let pos = self.cur_pos().unwrap_or(0);
        self.expect(TokenKind::Put, "put")?;
        let mut pairs = Vec::new();
        while self.cur().is_some() {
            pairs.push(self.parse_put_pair()?);
            if self.cur().is_none() {
                break;
            }
            self.expect(TokenKind::Sep, ",")?;
        }
        let stmt = PutStmt { pos, pairs };
        let ctx = CheckCtx {
            not_allow_value: true,
            ..Default::default()
        };
        validate_put(&stmt, &ctx)?;
        Ok(stmt)
    }

    fn parse_put_pair(&mut self) -> Result<PutPair> {
        self.expect(TokenKind::LParen, "(")?;
        let key = self.parse_expr()?;
        match self.cur() {
            Some(tok) if tok.kind == TokenKind::Sep => self.advance(),
            Some(tok) => {
                return Err(KeyqlError::syntax(
                    tok.pos,
                    format!("Put key-value pair expect `,` but got {}", tok.lexeme),
                ));
            }
            None => {
                return Err(KeyqlError::syntax(None, "Put key-value pair expect `,`"));
            }
        }
        let value = self.parse_expr()?;
        self.expect(TokenKind::RParen, ")")?;
        Ok(PutPair { key, value })
    }

    fn parse_remove(&mut self) -> Result<RemoveStmt> {
        let pos = self.cur_pos().unwrap_or(0);
        self.expect(TokenKind::Remove, "remove")?;
        let mut keys = Vec::new();
        while self.cur().is_some() {
            keys.push(self.parse_expr()?);
            if self.cur().is_none() {
                break;
            }
            self.expect(TokenKind::Sep, ",")?;
        }
        let stmt = RemoveStmt { pos, keys };
        let ctx = CheckCtx {
            not_allow_key: true,
            not_allow_value: true,
            ..Default::default()
        };
        validate_remove(&stmt, &ctx)?;
        Ok(stmt)
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt> {
        let pos = self.cur_pos().unwrap_or(0);
        self.expect(TokenKind::Delete, "delete")?;
        let wtok = self.expect(TokenKind::Where, "where")?;
        if self.cur().is_none() {
            return Err(KeyqlError::syntax(None, "Expect where statement"));
        }
        let mut expr = self.parse_expr()?;
        let mut limit = None;
        if self.cur_kind() == Some(TokenKind::Limit) {
            limit = Some(self.parse_limit()?);
        }
        if let Some(extra) = self.cur() {
            return Err(KeyqlError::syntax(extra.pos, "Missing operator"));
        }
        let ctx = CheckCtx::default();
        expr.check(&ctx)?;
        if expr.return_type() != ValueType::Bool {
            return Err(KeyqlError::syntax(
                expr.pos(),
                "where statement result type should be boolean",
            ));
        }
        Ok(DeleteStmt {
            pos,
            where_stmt: WhereStmt {
                pos: wtok.pos,
                expr,
            },
            limit,
        })
    }

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_binary_expr(None, LOWEST_PREC + 1)
    }

    fn parse_binary_expr(&mut self, seed: Option<Expr>, prec1: u8) -> Result<Expr> {
        let mut x = match seed {
            Some(e) => e,
            None => self.parse_unary_expr()?,
        };
        let mut n = 0;
        let result = loop {
            n += 1;
            if let Err(e) = self.inc_nest() {
                break Err(e);
            }
            let (op_pos, op_lexeme, oprec) = match self.cur() {
                Some(tok) if tok.kind == TokenKind::Operator => {
                    (tok.pos, tok.lexeme.clone(), tok.precedence())
                }
                _ => break Ok(x),
            };
            if oprec < prec1 {
                break Ok(x);
            }
            self.advance();
            let y = match op_lexeme.as_str() {
                "in" => {
                    // A parenthesized list is parsed as a list; anything
                    // else continues as a normal expression.
                    if self.cur_kind() == Some(TokenKind::LParen) {
                        self.parse_list(op_pos)
                    } else {
                        self.parse_binary_expr(None, oprec + 1)
                    }
                }
                "between" => self.parse_between(op_pos, oprec + 1),
                _ => self.parse_binary_expr(None, oprec + 1),
            };
            let y = match y {
                Ok(y) => y,
                Err(e) => break Err(e),
            };
            let op = match Operator::from_lexeme(op_pos, &op_lexeme) {
                Ok(op) => op,
                Err(e) => break Err(e),
            };
            x = Expr::Binary {
                pos: op_pos,
                op,
                left: Box::new(x),
                right: Box::new(y),
            };
        };
        self.dec_nest(n);
        result
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        self.inc_nest()?;
        let result = match self.cur() {
            None => Err(KeyqlError::syntax(None, "Unexpected EOF")),
            Some(tok) if tok.kind == TokenKind::Operator && tok.lexeme == "!" => {
                let pos = tok.pos;
                self.advance();
                let right = self.parse_unary_expr()?;
                Ok(Expr::Not {
                    pos,
                    right: Box::new(right),
                })
            }
            Some(_) => self.parse_primary_expr(),
        };
        self.dec_nest(1);
        result
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        let mut x = self.parse_operand()?;
        let mut n = 0;
        let result = loop {
            n += 1;
            if let Err(e) = self.inc_nest() {
                break Err(e);
            }
            match self.cur_kind() {
                Some(TokenKind::LParen) => match self.parse_func_call(x) {
                    Ok(next) => x = next,
                    Err(e) => break Err(e),
                },
                Some(TokenKind::LBrack) => {
                    let pos = self.cur_pos().unwrap_or(0);
                    match self.parse_field_access(pos, x) {
                        Ok(next) => x = next,
                        Err(e) => break Err(e),
                    }
                }
                _ => break Ok(x),
            }
        };
        self.dec_nest(n);
        result
    }

    fn parse_func_call(&mut self, fun: Expr) -> Result<Expr> {
        self.expect(TokenKind::LParen, "(")?;
        let mut args = Vec::new();
        while let Some(tok) = self.cur() {
            if tok.kind == TokenKind::RParen {
                break;
            }
            args.push(self.parse_expr()?);
            match self.cur() {
                Some(t) if t.kind == TokenKind::RParen => break,
                Some(t) if t.kind == TokenKind::Sep => self.advance(),
                Some(t) => {
                    return Err(KeyqlError::syntax(
                        t.pos,
                        format!("Function argument expect `,` or `)` but got {}", t.lexeme),
                    ));
                }
                None => break,
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        Ok(Expr::Call {
            pos: fun.pos(),
            name: Box::new(fun),
            args,
            result: new_result_slot(),
        })
    }

    fn parse_field_access(&mut self, pos: usize, left: Expr) -> Result<Expr> {
        self.expect(TokenKind::LBrack, "[")?;
        let mut indexes = Vec::new();
        while let Some(tok) = self.cur() {
            if tok.kind == TokenKind::RBrack {
                break;
            }
            indexes.push(self.parse_expr()?);
            match self.cur() {
                Some(t) if t.kind == TokenKind::RBrack => break,
                _ => self.advance(),
            }
        }
        self.expect(TokenKind::RBrack, "]")?;
        if indexes.len() != 1 {
            return Err(KeyqlError::syntax(
                pos,
                "Field access operator should only have one field name",
            ));
        }
        Ok(Expr::Access {
            pos,
            left: Box::new(left),
            index: Box::new(indexes.into_iter().next().unwrap()),
        })
    }

    fn parse_list(&mut self, pos: usize) -> Result<Expr> {
        self.expect(TokenKind::LParen, "(")?;
        let mut items = Vec::new();
        while let Some(tok) = self.cur() {
            if tok.kind == TokenKind::RParen {
                break;
            }
            items.push(self.parse_expr()?);
            match self.cur() {
                Some(t) if t.kind == TokenKind::RParen => break,
                _ => self.advance(),
            }
        }
        self.expect(TokenKind::RParen, ")")?;
        Ok(Expr::List { pos, items })
    }

    /// `x between LOWER and UPPER`, encoded as a two-element list on the
    /// right of the operator.
    fn parse_between(&mut self, pos: usize, oprec: u8) -> Result<Expr> {
        let lower = self.parse_binary_expr(None, oprec)?;
        match self.cur() {
            Some(tok) if tok.kind == TokenKind::Operator && tok.lexeme == "and" => {
                self.advance();
            }
            Some(tok) => {
                return Err(KeyqlError::syntax(
                    tok.pos,
                    format!("Expect token and but got {}", tok.lexeme),
                ));
            }
            None => {
                return Err(KeyqlError::syntax(None, "Expect token and but got EOF"));
            }
        }
        let upper = self.parse_binary_expr(None, oprec)?;
        Ok(Expr::List {
            pos,
            items: vec![lower, upper],
        })
    }

    fn parse_operand(&mut self) -> Result<Expr> {
        let tok = match self.cur() {
            Some(t) => t.clone(),
            None => return Err(KeyqlError::syntax(None, "Bad Expression")),
        };
        let expr = match tok.kind {
            TokenKind::Key => Expr::Field {
                pos: tok.pos,
                which: FieldKeyword::Key,
            },
            TokenKind::Value => Expr::Field {
                pos: tok.pos,
                which: FieldKeyword::Value,
            },
            TokenKind::Str => Expr::StringLit {
                pos: tok.pos,
                value: tok.lexeme.clone(),
            },
            TokenKind::Name => Expr::Name {
                pos: tok.pos,
                name: tok.lexeme.clone(),
            },
            TokenKind::Number => Expr::number(tok.pos, &tok.lexeme),
            TokenKind::Float => Expr::float(tok.pos, &tok.lexeme),
            TokenKind::True => Expr::BoolLit {
                pos: tok.pos,
                value: true,
            },
            TokenKind::False => Expr::BoolLit {
                pos: tok.pos,
                value: false,
            },
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, ")")?;
                return Ok(inner);
            }
            _ => return Err(KeyqlError::syntax(tok.pos, "Bad Expression")),
        };
        self.advance();
        Ok(expr)
    }
}

fn is_clause_start(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Where | TokenKind::Order | TokenKind::Group | TokenKind::Limit
    )
}

fn implicit_select_all(pos: usize) -> SelectStmt {
    let key = Rc::new(Expr::Field {
        pos: 0,
        which: FieldKeyword::Key,
    });
    let value = Rc::new(Expr::Field {
        pos: 0,
        which: FieldKeyword::Value,
    });
    SelectStmt {
        pos,
        all_fields: true,
        field_names: vec![key.to_string(), value.to_string()],
        field_types: vec![ValueType::Str, ValueType::Str],
        fields: vec![key, value],
        where_stmt: WhereStmt {
            pos,
            expr: Expr::BoolLit { pos, value: true },
        },
        order: None,
        group_by: None,
        limit: None,
    }
}

/// Resolve an ORDER/GROUP name against the projection, by alias or
/// rendered form.
fn find_field_in_select(stmt: &SelectStmt, field_name: &str, pos: usize) -> Result<Rc<Expr>> {
    let idx = stmt
        .field_names
        .iter()
        .position(|n| n == field_name)
        .ok_or_else(|| {
            KeyqlError::syntax(
                pos,
                format!("Cannot find field {field_name} in select statement"),
            )
        })?;
    let fexpr = stmt.fields[idx].clone();
    match fexpr.return_type() {
        ValueType::Str | ValueType::Number | ValueType::Bool => Ok(fexpr),
        _ => Err(KeyqlError::syntax(
            fexpr.pos(),
            format!("Field {field_name} return wrong type"),
        )),
    }
}

fn validate_select_fields(stmt: &mut SelectStmt, ctx: &CheckCtx) -> Result<()> {
    let mut rebuilt = Vec::with_capacity(stmt.fields.len());
    for field in &stmt.fields {
        let mut owned = (**field).clone();
        owned.check(ctx)?;
        check_no_nested_aggr(&owned)?;
        rebuilt.push(Rc::new(owned));
    }
    stmt.fields = rebuilt;
    Ok(())
}

fn validate_put(stmt: &PutStmt, ctx: &CheckCtx) -> Result<()> {
    for pair in &stmt.pairs {
        let mut key = pair.key.clone();
        key.check(ctx)?;
        match key.return_type() {
            ValueType::Str | ValueType::Number => {}
            _ => {
                return Err(KeyqlError::syntax(key.pos(), "need str or number type"));
            }
        }
        let mut value = pair.value.clone();
        value.check(ctx)?;
        match value.return_type() {
            ValueType::Str | ValueType::Number => {}
            _ => {
                return Err(KeyqlError::syntax(value.pos(), "need str or number type"));
            }
        }
    }
    Ok(())
}

fn validate_remove(stmt: &RemoveStmt, ctx: &CheckCtx) -> Result<()> {
    for key in &stmt.keys {
        match key.return_type() {
            ValueType::Str | ValueType::Number => {}
            _ => {
                return Err(KeyqlError::syntax(key.pos(), "need str or number type"));
            }
        }
        let mut owned = key.clone();
        owned.check(ctx)?;
    }
    Ok(())
}

/// Parse and check a bare boolean/value expression. Test and embedding
/// convenience; statement-level rules (boolean WHERE, projections) do not
/// apply.
pub fn parse_where_expr(query: &str) -> Result<Expr> {
    let mut p = Parser::new(query);
    if p.cur().is_none() {
        return Err(KeyqlError::syntax(None, "Bad Expression"));
    }
    let mut expr = p.parse_expr()?;
    if let Some(extra) = p.cur() {
        return Err(KeyqlError::syntax(extra.pos, "Missing operator"));
    }
    expr.check(&CheckCtx::default())?;
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> Result<Statement> {
        Parser::new(query).parse()
    }

    fn parse_select_stmt(query: &str) -> SelectStmt {
        match parse(query).unwrap() {
            Statement::Select(s) => s,
            other => panic!("expected select, got {}", other.name()),
        }
    }

    #[test]
    fn test_where_only_is_select_star() {
        let s = parse_select_stmt("where key = 'test'");
        assert!(s.all_fields);
        assert_eq!(s.field_names, vec!["KEY", "VALUE"]);
        assert_eq!(s.where_stmt.expr.to_string(), "(KEY = 'test')");
    }

    #[test]
    fn test_select_fields_with_alias() {
        let s = parse_select_stmt("select key, int(value) * 2 as d where key ^= 'k'");
        assert!(!s.all_fields);
        assert_eq!(s.field_names, vec!["KEY", "d"]);
        assert_eq!(s.field_types, vec![ValueType::Str, ValueType::Number]);
        assert_eq!(s.fields[1].to_string(), "(int(VALUE) * 2)");
    }

    #[test]
    fn test_select_without_where() {
        let s = parse_select_stmt("select * limit 5");
        assert!(s.all_fields);
        assert_eq!(s.where_stmt.expr.to_string(), "true");
        assert_eq!(s.limit.unwrap().count, 5);
    }

    #[test]
    fn test_precedence_shapes() {
        let s = parse_select_stmt("where key = 'a' | key = 'b' & value = 'c'");
        // & binds tighter than |
        assert_eq!(
            s.where_stmt.expr.to_string(),
            "((KEY = 'a') | ((KEY = 'b') & (VALUE = 'c')))"
        );
        let s = parse_select_stmt("select int(value) + 2 * 3 as x where key = 'a'");
        assert_eq!(s.fields[0].to_string(), "(int(VALUE) + (2 * 3))");
    }

    #[test]
    fn test_word_operators_normalize() {
        let sym = parse_select_stmt("where key = 'a' & value = 'b'");
        let word = parse_select_stmt("where key = 'a' and value = 'b'");
        assert_eq!(
            sym.where_stmt.expr.to_string(),
            word.where_stmt.expr.to_string()
        );
    }

    #[test]
    fn test_alias_rewrite_in_where() {
        let s = parse_select_stmt("select int(value) as v where v > 10");
        let rendered = s.where_stmt.expr.to_string();
        assert_eq!(rendered, "(`v` > 10)");
    }

    #[test]
    fn test_order_by_resolution() {
        let s = parse_select_stmt("select key, int(value) as n where key ^= 'k' order by n desc, key");
        let order = s.order.unwrap();
        assert_eq!(order.orders.len(), 2);
        assert_eq!(order.orders[0].name, "n");
        assert_eq!(order.orders[0].order, SortOrder::Desc);
        assert_eq!(order.orders[1].name, "key");
        assert_eq!(order.orders[1].order, SortOrder::Asc);
        assert!(parse("select key where key = 'a' order by nope").is_err());
    }

    #[test]
    fn test_order_by_key_resolves_against_star() {
        // `key` resolves against the implicit KEY field only via its
        // rendered form
        assert!(parse("where key ^= 'k' order by key").is_ok());
    }

    #[test]
    fn test_group_by() {
        let s = parse_select_stmt("select value, count(1) as c where key ^= 'k' group by value");
        let group = s.group_by.unwrap();
        assert_eq!(group.fields.len(), 1);
        assert_eq!(group.fields[0].name, "VALUE");
        assert!(parse("select value, count(1) group by count(1)").is_err());
    }

    #[test]
    fn test_limit_forms() {
        let s = parse_select_stmt("where key ^= 'k' limit 10");
        let l = s.limit.unwrap();
        assert_eq!((l.start, l.count), (0, 10));
        let s = parse_select_stmt("where key ^= 'k' limit 5, 10");
        let l = s.limit.unwrap();
        assert_eq!((l.start, l.count), (5, 10));
        assert!(parse("where key ^= 'k' limit").is_err());
        assert!(parse("where key ^= 'k' limit 1, 2, 3").is_err());
    }

    #[test]
    fn test_put_statement() {
        let stmt = parse("put ('k1', 'v1'), ('k2', upper('v2'))").unwrap();
        match stmt {
            Statement::Put(p) => {
                assert_eq!(p.pairs.len(), 2);
                assert_eq!(p.pairs[1].value.to_string(), "upper('v2')");
            }
            other => panic!("expected put, got {}", other.name()),
        }
        // value field reference is not allowed in put expressions
        assert!(parse("put ('k', value)").is_err());
        // the key being written may feed the value expression
        assert!(parse("put ('k', key + '-suffix')").is_ok());
    }

    #[test]
    fn test_remove_statement() {
        let stmt = parse("remove 'k1', 'k2'").unwrap();
        match stmt {
            Statement::Remove(r) => assert_eq!(r.keys.len(), 2),
            other => panic!("expected remove, got {}", other.name()),
        }
        assert!(parse("remove key").is_err());
    }

    #[test]
    fn test_delete_statement() {
        let stmt = parse("delete where key in ('a', 'b') limit 1").unwrap();
        match stmt {
            Statement::Delete(d) => {
                assert!(d.limit.is_some());
                assert_eq!(d.where_stmt.expr.to_string(), "(KEY in ('a', 'b'))");
            }
            other => panic!("expected delete, got {}", other.name()),
        }
        assert!(parse("delete").is_err());
    }

    #[test]
    fn test_trailing_semicolons_stripped() {
        assert!(parse("where key = 'a';;;").is_ok());
    }

    #[test]
    fn test_where_requires_boolean() {
        assert!(parse("where int(value) + 1")
            .unwrap_err()
            .to_string()
            .contains("should be boolean"));
    }

    #[test]
    fn test_backtick_names_escape_keywords() {
        let s = parse_select_stmt("select key as `select` where `select` != 'x'");
        assert_eq!(s.field_names, vec!["select"]);
        assert_eq!(s.where_stmt.expr.to_string(), "(`select` != 'x')");
    }

    #[test]
    fn test_parse_render_reparse_stable() {
        for q in [
            "where key = 'test'",
            "where key ^= 'p' & value ~= 'z+'",
            "where key between 'a' and 'b'",
            "where key in ('x', 'y', 'z')",
            "where !(key = 'a') | int(value) > 3",
        ] {
            let first = parse_select_stmt(q).where_stmt.expr.to_string();
            let again = parse_select_stmt(&format!("where {first}"))
                .where_stmt
                .expr
                .to_string();
            assert_eq!(first, again, "query {q}");
        }
    }

    #[test]
    fn test_error_positions_point_into_query() {
        let query = "where key == 'a'";
        let err = parse(query).unwrap_err();
        match err {
            KeyqlError::Syntax { pos, .. } => {
                assert!(pos.is_some());
                assert!(pos.unwrap() < query.len());
            }
            other => panic!("expected syntax error, got {other}"),
        }
    }
}
