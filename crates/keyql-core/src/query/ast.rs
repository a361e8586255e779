use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{KeyqlError, Result};
use crate::exec::value::Value;

/// The two scan fields a row exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKeyword {
    Key,
    Value,
}

impl fmt::Display for FieldKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKeyword::Key => write!(f, "KEY"),
            FieldKeyword::Value => write!(f, "VALUE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    And,
    Or,
    Not,
    Eq,
    NotEq,
    PrefixMatch,
    RegexpMatch,
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Between,
}

impl Operator {
    /// Map an operator lexeme to its operator. The word forms `and`/`or`
    /// are aliases of `&`/`|`.
    pub fn from_lexeme(pos: usize, lexeme: &str) -> Result<Operator> {
        Ok(match lexeme {
            "=" => Operator::Eq,
            "!=" => Operator::NotEq,
            "^=" => Operator::PrefixMatch,
            "~=" => Operator::RegexpMatch,
            "&" | "and" => Operator::And,
            "|" | "or" => Operator::Or,
            "!" => Operator::Not,
            "+" => Operator::Add,
            "-" => Operator::Sub,
            "*" => Operator::Mul,
            "/" => Operator::Div,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "in" => Operator::In,
            "between" => Operator::Between,
            _ => return Err(KeyqlError::syntax(pos, "Unknown operator")),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::And => "&",
            Operator::Or => "|",
            Operator::Not => "!",
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::PrefixMatch => "^=",
            Operator::RegexpMatch => "~=",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "in",
            Operator::Between => "between",
        };
        write!(f, "{s}")
    }
}

/// Static type tag derived bottom-up during Check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Unknown,
    Bool,
    Str,
    Number,
    Ident,
    List,
    Json,
}

/// Slot the aggregate plan fills before re-evaluating a select expression;
/// shared between the plan and the call node it belongs to.
pub type ResultSlot = Rc<RefCell<Option<Value>>>;

pub fn new_result_slot() -> ResultSlot {
    Rc::new(RefCell::new(None))
}

/// Expression AST. A closed set of variants with a uniform capability set:
/// check (query::check), eval/eval_batch (exec), return_type, pos, walk,
/// render (Display).
#[derive(Debug, Clone)]
pub enum Expr {
    Binary {
        pos: usize,
        op: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not {
        pos: usize,
        right: Box<Expr>,
    },
    Field {
        pos: usize,
        which: FieldKeyword,
    },
    StringLit {
        pos: usize,
        value: String,
    },
    NumberLit {
        pos: usize,
        text: String,
        value: i64,
    },
    FloatLit {
        pos: usize,
        text: String,
        value: f64,
    },
    BoolLit {
        pos: usize,
        value: bool,
    },
    /// Unresolved identifier; Check rewrites references to projection
    /// aliases into `FieldRef`.
    Name {
        pos: usize,
        name: String,
    },
    /// Alias pointer to a projection field. Shares ownership of the
    /// aliased expression; never a back-pointer.
    FieldRef {
        pos: usize,
        name: String,
        field: Rc<Expr>,
    },
    List {
        pos: usize,
        items: Vec<Expr>,
    },
    Call {
        pos: usize,
        name: Box<Expr>,
        args: Vec<Expr>,
        result: ResultSlot,
    },
    /// JSON object access (string index) or list index (integer index).
    Access {
        pos: usize,
        left: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    pub fn number(pos: usize, text: &str) -> Expr {
        Expr::NumberLit {
            pos,
            text: text.to_string(),
            value: text.parse().unwrap_or(0),
        }
    }

    pub fn float(pos: usize, text: &str) -> Expr {
        Expr::FloatLit {
            pos,
            text: text.to_string(),
            value: text.parse().unwrap_or(0.0),
        }
    }

    pub fn pos(&self) -> usize {
        match self {
            Expr::Binary { pos, .. }
            | Expr::Not { pos, .. }
            | Expr::Field { pos, .. }
            | Expr::StringLit { pos, .. }
            | Expr::NumberLit { pos, .. }
            | Expr::FloatLit { pos, .. }
            | Expr::BoolLit { pos, .. }
            | Expr::Name { pos, .. }
            | Expr::FieldRef { pos, .. }
            | Expr::List { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Access { pos, .. } => *pos,
        }
    }

    /// The lowercased function name of a `Call` node, when its name part
    /// is a plain identifier.
    pub fn call_name(&self) -> Option<String> {
        match self {
            Expr::Call { name, .. } => match name.as_ref() {
                Expr::Name { name, .. } => Some(name.to_ascii_lowercase()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Static return type, derived bottom-up.
    pub fn return_type(&self) -> ValueType {
        match self {
            Expr::Binary { op, left, .. } => match op {
                Operator::And
                | Operator::Or
                | Operator::Not
                | Operator::Eq
                | Operator::NotEq
                | Operator::PrefixMatch
                | Operator::RegexpMatch
                | Operator::Gt
                | Operator::Gte
                | Operator::Lt
                | Operator::Lte
                | Operator::In
                | Operator::Between => ValueType::Bool,
                Operator::Sub | Operator::Mul | Operator::Div => ValueType::Number,
                Operator::Add => {
                    if left.return_type() == ValueType::Str {
                        ValueType::Str
                    } else {
                        ValueType::Number
                    }
                }
            },
            Expr::Not { .. } => ValueType::Bool,
            Expr::Field { .. } => ValueType::Str,
            Expr::StringLit { .. } => ValueType::Str,
            Expr::NumberLit { .. } | Expr::FloatLit { .. } => ValueType::Number,
            Expr::BoolLit { .. } => ValueType::Bool,
            Expr::Name { .. } => ValueType::Ident,
            Expr::FieldRef { field, .. } => field.return_type(),
            Expr::List { .. } => ValueType::List,
            Expr::Call { .. } => match self.call_name() {
                Some(fname) => crate::func::function_return_type(&fname),
                None => ValueType::Unknown,
            },
            Expr::Access { .. } => ValueType::Str,
        }
    }

    /// Pre-order walk. Returning false from the callback prunes the
    /// subtree.
    pub fn walk(&self, cb: &mut dyn FnMut(&Expr) -> bool) {
        if !cb(self) {
            return;
        }
        match self {
            Expr::Binary { left, right, .. } => {
                left.walk(cb);
                right.walk(cb);
            }
            Expr::Not { right, .. } => right.walk(cb),
            Expr::FieldRef { field, .. } => field.walk(cb),
            Expr::List { items, .. } => {
                for item in items {
                    item.walk(cb);
                }
            }
            Expr::Call { name, args, .. } => {
                name.walk(cb);
                for arg in args {
                    arg.walk(cb);
                }
            }
            Expr::Access { left, index, .. } => {
                left.walk(cb);
                index.walk(cb);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Binary { op, left, right, .. } => {
                if *op == Operator::Between {
                    if let Expr::List { items, .. } = right.as_ref() {
                        if items.len() == 2 {
                            return write!(
                                f,
                                "({left} BETWEEN {} AND {})",
                                items[0], items[1]
                            );
                        }
                    }
                }
                write!(f, "({left} {op} {right})")
            }
            Expr::Not { right, .. } => write!(f, "!({right})"),
            Expr::Field { which, .. } => write!(f, "{which}"),
            Expr::StringLit { value, .. } => write!(f, "'{value}'"),
            Expr::NumberLit { text, .. } => write!(f, "{text}"),
            Expr::FloatLit { text, .. } => write!(f, "{text}"),
            Expr::BoolLit { value, .. } => write!(f, "{value}"),
            Expr::Name { name, .. } => write!(f, "{name}"),
            Expr::FieldRef { name, .. } => write!(f, "`{name}`"),
            Expr::List { items, .. } => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Expr::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Access { left, index, .. } => write!(f, "{left}[{index}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct WhereStmt {
    pub pos: usize,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
pub struct OrderField {
    pub name: String,
    pub field: Rc<Expr>,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct OrderStmt {
    pub pos: usize,
    pub orders: Vec<OrderField>,
}

#[derive(Debug, Clone)]
pub struct GroupByField {
    pub name: String,
    pub expr: Rc<Expr>,
}

#[derive(Debug, Clone)]
pub struct GroupByStmt {
    pub pos: usize,
    pub fields: Vec<GroupByField>,
}

#[derive(Debug, Clone, Copy)]
pub struct LimitStmt {
    pub pos: usize,
    pub start: usize,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub pos: usize,
    pub all_fields: bool,
    pub field_names: Vec<String>,
    pub field_types: Vec<ValueType>,
    pub fields: Vec<Rc<Expr>>,
    pub where_stmt: WhereStmt,
    pub order: Option<OrderStmt>,
    pub group_by: Option<GroupByStmt>,
    pub limit: Option<LimitStmt>,
}

#[derive(Debug, Clone)]
pub struct PutPair {
    pub key: Expr,
    pub value: Expr,
}

impl fmt::Display for PutPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: {}}}", self.key, self.value)
    }
}

#[derive(Debug, Clone)]
pub struct PutStmt {
    pub pos: usize,
    pub pairs: Vec<PutPair>,
}

#[derive(Debug, Clone)]
pub struct RemoveStmt {
    pub pos: usize,
    pub keys: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub pos: usize,
    pub where_stmt: WhereStmt,
    pub limit: Option<LimitStmt>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStmt),
    Put(PutStmt),
    Remove(RemoveStmt),
    Delete(DeleteStmt),
}

impl Statement {
    pub fn name(&self) -> &'static str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Put(_) => "PUT",
            Statement::Remove(_) => "REMOVE",
            Statement::Delete(_) => "DELETE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_between_uses_sql_form() {
        let e = Expr::Binary {
            pos: 0,
            op: Operator::Between,
            left: Box::new(Expr::Field {
                pos: 0,
                which: FieldKeyword::Key,
            }),
            right: Box::new(Expr::List {
                pos: 0,
                items: vec![
                    Expr::StringLit {
                        pos: 0,
                        value: "a".into(),
                    },
                    Expr::StringLit {
                        pos: 0,
                        value: "b".into(),
                    },
                ],
            }),
        };
        assert_eq!(e.to_string(), "(KEY BETWEEN 'a' AND 'b')");
    }

    #[test]
    fn test_walk_prunes() {
        let e = Expr::Binary {
            pos: 0,
            op: Operator::And,
            left: Box::new(Expr::BoolLit { pos: 0, value: true }),
            right: Box::new(Expr::BoolLit { pos: 4, value: false }),
        };
        let mut seen = 0;
        e.walk(&mut |_| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
        seen = 0;
        e.walk(&mut |_| {
            seen += 1;
            true
        });
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_add_type_depends_on_left() {
        let concat = Expr::Binary {
            pos: 0,
            op: Operator::Add,
            left: Box::new(Expr::StringLit {
                pos: 0,
                value: "a".into(),
            }),
            right: Box::new(Expr::StringLit {
                pos: 0,
                value: "b".into(),
            }),
        };
        assert_eq!(concat.return_type(), ValueType::Str);
        let sum = Expr::Binary {
            pos: 0,
            op: Operator::Add,
            left: Box::new(Expr::number(0, "1")),
            right: Box::new(Expr::number(0, "2")),
        };
        assert_eq!(sum.return_type(), ValueType::Number);
    }
}
