//! Transform syntax tree
//!
//! A transform is a pipeline of expressions separated by `|`. Each expression
//! maps one datapoint to zero or one datapoint.
//!
//! ```text
//! if($[temp] > 30) | $[temp]
//! set($[f], $[c] * 9 / 5 + 32)
//! has(alarm) and not $[alarm, muted]
//! ```

use serde_json::Value;

/// One step inside `$[...]`
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    /// Object member
    Key(String),
    /// Array element
    Index(usize),
}

impl PathSegment {
    /// Look this segment up in a JSON value
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match self {
            PathSegment::Key(key) => value.as_object()?.get(key),
            PathSegment::Index(i) => value.as_array()?.get(*i),
        }
    }
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{:?}", key),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Follow a whole path; `None` when any step is missing
pub fn lookup<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| segment.get(current))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant JSON value
    Literal(Value),
    /// `$`
    Identity,
    /// `$[a, b]`
    Get(Vec<PathSegment>),
    /// `has(a)`
    Has(PathSegment),
    /// `if(cond)`: keep the datapoint when `cond` is true
    Filter(Box<Expr>),
    /// `not e`
    Not(Box<Expr>),
    /// `-e`
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `name(args)` or bare `name`
    Call { name: String, args: Vec<Expr> },
    /// `set($[path], e)`; an empty path replaces the whole value
    Set {
        path: Vec<PathSegment>,
        value: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

fn write_path(f: &mut std::fmt::Formatter<'_>, path: &[PathSegment]) -> std::fmt::Result {
    write!(f, "$[")?;
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", segment)?;
    }
    write!(f, "]")
}

/// Fully parenthesized rendering, used in logs and tests
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Identity => write!(f, "$"),
            Expr::Get(path) => write_path(f, path),
            Expr::Has(segment) => write!(f, "has({})", segment),
            Expr::Filter(cond) => write!(f, "if({})", cond),
            Expr::Not(e) => write!(f, "(not {})", e),
            Expr::Neg(e) => write!(f, "(-{})", e),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Set { path, value } => {
                write!(f, "set(")?;
                if path.is_empty() {
                    write!(f, "$")?;
                } else {
                    write_path(f, path)?;
                }
                write!(f, ", {})", value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup() {
        let value = json!({"a": {"b": [10, 20]}});
        let path = vec![
            PathSegment::Key("a".to_string()),
            PathSegment::Key("b".to_string()),
            PathSegment::Index(1),
        ];
        assert_eq!(lookup(&value, &path), Some(&json!(20)));
        assert_eq!(lookup(&value, &[PathSegment::Key("z".to_string())]), None);
        assert_eq!(lookup(&value, &[]), Some(&value));
        assert_eq!(lookup(&json!(5), &[PathSegment::Index(0)]), None);
    }

    #[test]
    fn test_display() {
        let expr = Expr::Filter(Box::new(Expr::binary(
            BinaryOp::Gt,
            Expr::Get(vec![PathSegment::Key("x".to_string())]),
            Expr::Literal(json!(3)),
        )));
        assert_eq!(expr.to_string(), r#"if(($["x"] > 3))"#);
    }
}
