//! Expression trees
//!
//! The SQL compiler is an external collaborator; it hands the core
//! already-built [`Expr`] trees for CHECK constraints and column defaults.
//! Evaluation follows SQL three-valued logic: comparisons over `Null`
//! yield `Null`, `AND`/`OR` short-circuit through the Kleene tables, and a
//! CHECK only fails when its expression evaluates to `FALSE`.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::schema::TableInfo;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `AND`
    And,
    /// `OR`
    Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `NOT`
    Not,
}

/// An evaluable expression over one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Constant
    Literal(Value),
    /// Column reference by name
    Column(String),
    /// Unary application
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        expr: Box<Expr>,
    },
    /// Binary application
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// `IS NULL` / `IS NOT NULL`
    IsNull {
        /// Tested expression
        expr: Box<Expr>,
        /// `IS NOT NULL` when true
        negated: bool,
    },
}

impl Expr {
    /// Literal shorthand.
    pub fn lit(v: Value) -> Expr {
        Expr::Literal(v)
    }

    /// Column reference shorthand.
    pub fn col(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    /// Binary application shorthand.
    pub fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluate against a row laid out per `info`.
    pub fn eval(&self, row: &Row, info: &TableInfo) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => {
                let idx = info.column_index(name).ok_or_else(|| {
                    Error::NotFound(format!("column '{}' in table '{}'", name, info.name()))
                })?;
                Ok(row.get(idx).cloned().unwrap_or(Value::Null))
            }
            Expr::Unary { op, expr } => {
                let v = expr.eval(row, info)?;
                match op {
                    UnaryOp::Neg => v.neg(),
                    UnaryOp::Not => Ok(match v {
                        Value::Boolean(b) => Value::Boolean(!b),
                        _ => Value::Null,
                    }),
                }
            }
            Expr::Binary { op, left, right } => {
                let l = left.eval(row, info)?;
                // Kleene AND/OR can short-circuit on a known left side.
                match op {
                    BinaryOp::And => {
                        if l == Value::Boolean(false) {
                            return Ok(Value::Boolean(false));
                        }
                        let r = right.eval(row, info)?;
                        return Ok(kleene_and(&l, &r));
                    }
                    BinaryOp::Or => {
                        if l == Value::Boolean(true) {
                            return Ok(Value::Boolean(true));
                        }
                        let r = right.eval(row, info)?;
                        return Ok(kleene_or(&l, &r));
                    }
                    _ => {}
                }
                let r = right.eval(row, info)?;
                match op {
                    BinaryOp::Add => l.add(&r),
                    BinaryOp::Sub => l.sub(&r),
                    BinaryOp::Mul => l.mul(&r),
                    BinaryOp::Div => l.div(&r),
                    cmp => Ok(eval_comparison(*cmp, &l, &r)),
                }
            }
            Expr::IsNull { expr, negated } => {
                let v = expr.eval(row, info)?;
                Ok(Value::Boolean(v.is_null() != *negated))
            }
        }
    }

    /// Evaluate as a predicate: `Some(true/false)` for a definite
    /// boolean, `None` for `Null`/unknown. A CHECK constraint passes on
    /// `Some(true)` and `None`.
    pub fn eval_predicate(&self, row: &Row, info: &TableInfo) -> Result<Option<bool>> {
        Ok(match self.eval(row, info)? {
            Value::Boolean(b) => Some(b),
            _ => None,
        })
    }
}

fn eval_comparison(op: BinaryOp, l: &Value, r: &Value) -> Value {
    let Some(ord) = l.sql_compare(r, None) else {
        return Value::Null;
    };
    let b = match op {
        BinaryOp::Eq => ord.is_eq(),
        BinaryOp::NotEq => ord.is_ne(),
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::LtEq => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::GtEq => ord.is_ge(),
        _ => unreachable!("arithmetic handled by caller"),
    };
    Value::Boolean(b)
}

fn kleene_and(l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Boolean(false), _) | (_, Value::Boolean(false)) => Value::Boolean(false),
        (Value::Boolean(true), Value::Boolean(true)) => Value::Boolean(true),
        _ => Value::Null,
    }
}

fn kleene_or(l: &Value, r: &Value) -> Value {
    match (l, r) {
        (Value::Boolean(true), _) | (_, Value::Boolean(true)) => Value::Boolean(true),
        (Value::Boolean(false), Value::Boolean(false)) => Value::Boolean(false),
        _ => Value::Null,
    }
}
