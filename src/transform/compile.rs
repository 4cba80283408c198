//! Transform compiler
//!
//! Turns parsed expressions into a chain of [`Stage`]s. Compilation happens
//! once; evaluating a datapoint afterwards never re-parses or re-resolves.

use crate::storage::types::Datapoint;
use crate::transform::ast::{lookup, BinaryOp, Expr, PathSegment};
use crate::transform::error::{TransformError, TransformResult};
use crate::transform::parser::parse;
use crate::transform::registry::FunctionRegistry;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Maps one datapoint to zero (filtered) or one datapoint
pub trait Stage: Send {
    fn apply(&mut self, dp: &Datapoint) -> TransformResult<Option<Datapoint>>;
}

impl<F> Stage for F
where
    F: FnMut(&Datapoint) -> TransformResult<Option<Datapoint>> + Send,
{
    fn apply(&mut self, dp: &Datapoint) -> TransformResult<Option<Datapoint>> {
        self(dp)
    }
}

pub type BoxedStage = Box<dyn Stage>;

/// Box a closure as a stage
pub fn stage<F>(f: F) -> BoxedStage
where
    F: FnMut(&Datapoint) -> TransformResult<Option<Datapoint>> + Send + 'static,
{
    Box::new(f)
}

/// Evaluate a stage used as a sub-expression and take its value
pub fn value_of(stage: &mut BoxedStage, dp: &Datapoint) -> TransformResult<Value> {
    stage.apply(dp)?.map(|out| out.value).ok_or_else(|| {
        TransformError::Eval("sub-expression filtered out its datapoint".to_string())
    })
}

/// Numeric operand, or a type error naming the operation
pub fn as_number(value: &Value, operation: &str) -> TransformResult<f64> {
    value.as_f64().ok_or_else(|| {
        TransformError::Type(format!(
            "{} requires a number, got {}",
            operation,
            type_name(value)
        ))
    })
}

/// JSON number for an arithmetic result; integral results stay integers
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A compiled transform
pub struct Pipeline {
    source: String,
    stage: BoxedStage,
}

impl Pipeline {
    /// Text the pipeline was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn apply(&mut self, dp: &Datapoint) -> TransformResult<Option<Datapoint>> {
        self.stage.apply(dp)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Compile transform text against a function registry
pub fn compile(source: &str, registry: &FunctionRegistry) -> TransformResult<Pipeline> {
    let stages = parse(source)?
        .iter()
        .map(|expr| compile_expr(expr, registry))
        .collect::<TransformResult<Vec<_>>>()?;

    tracing::debug!(transform = source, stages = stages.len(), "Compiled transform");

    Ok(Pipeline {
        source: source.to_string(),
        stage: chain(stages),
    })
}

fn chain(mut stages: Vec<BoxedStage>) -> BoxedStage {
    if stages.len() == 1 {
        if let Some(only) = stages.pop() {
            return only;
        }
    }
    stage(move |dp: &Datapoint| {
        let mut current = dp.clone();
        for s in stages.iter_mut() {
            match s.apply(&current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    })
}

fn compile_expr(expr: &Expr, registry: &FunctionRegistry) -> TransformResult<BoxedStage> {
    Ok(match expr {
        Expr::Literal(value) => {
            let value = value.clone();
            stage(move |dp: &Datapoint| Ok(Some(dp.with_value(value.clone()))))
        }
        Expr::Identity => stage(|dp: &Datapoint| Ok(Some(dp.clone()))),
        Expr::Get(path) => {
            let path = path.clone();
            stage(move |dp: &Datapoint| {
                let found = lookup(&dp.value, &path).cloned().unwrap_or(Value::Null);
                Ok(Some(dp.with_value(found)))
            })
        }
        Expr::Has(segment) => {
            let segment = segment.clone();
            stage(move |dp: &Datapoint| {
                let present = segment.get(&dp.value).is_some();
                Ok(Some(dp.with_value(Value::Bool(present))))
            })
        }
        Expr::Filter(cond) => {
            let mut cond = compile_expr(cond, registry)?;
            stage(move |dp: &Datapoint| match value_of(&mut cond, dp)? {
                Value::Bool(true) => Ok(Some(dp.clone())),
                Value::Bool(false) => Ok(None),
                other => Err(TransformError::Type(format!(
                    "if() requires a boolean condition, got {}",
                    type_name(&other)
                ))),
            })
        }
        Expr::Not(inner) => {
            let mut inner = compile_expr(inner, registry)?;
            stage(move |dp: &Datapoint| {
                let b = as_bool(&value_of(&mut inner, dp)?, "not")?;
                Ok(Some(dp.with_value(Value::Bool(!b))))
            })
        }
        Expr::Neg(inner) => {
            let mut inner = compile_expr(inner, registry)?;
            stage(move |dp: &Datapoint| {
                let n = as_number(&value_of(&mut inner, dp)?, "negation")?;
                Ok(Some(dp.with_value(number_value(-n))))
            })
        }
        Expr::Binary { op, left, right } => {
            compile_binary(*op, compile_expr(left, registry)?, compile_expr(right, registry)?)
        }
        Expr::Call { name, args } => {
            let constructor = registry
                .lookup(name)
                .ok_or_else(|| TransformError::UnknownFunction(name.clone()))?;
            let args = args
                .iter()
                .map(|arg| compile_expr(arg, registry))
                .collect::<TransformResult<Vec<_>>>()?;
            constructor(args)?
        }
        Expr::Set { path, value } => {
            let path = path.clone();
            let mut value = compile_expr(value, registry)?;
            stage(move |dp: &Datapoint| {
                let computed = value_of(&mut value, dp)?;
                let mut doc = dp.value.clone();
                assign(&mut doc, &path, computed)?;
                Ok(Some(dp.with_value(doc)))
            })
        }
    })
}

fn compile_binary(op: BinaryOp, mut left: BoxedStage, mut right: BoxedStage) -> BoxedStage {
    match op {
        BinaryOp::And | BinaryOp::Or => stage(move |dp: &Datapoint| {
            let l = as_bool(&value_of(&mut left, dp)?, op.symbol())?;
            // Short-circuit: the right side is not evaluated once the result is known
            let result = match (op, l) {
                (BinaryOp::And, false) => false,
                (BinaryOp::Or, true) => true,
                _ => as_bool(&value_of(&mut right, dp)?, op.symbol())?,
            };
            Ok(Some(dp.with_value(Value::Bool(result))))
        }),
        op if op.is_comparison() => stage(move |dp: &Datapoint| {
            let l = value_of(&mut left, dp)?;
            let r = value_of(&mut right, dp)?;
            Ok(Some(dp.with_value(Value::Bool(compare(op, &l, &r)?))))
        }),
        op => stage(move |dp: &Datapoint| {
            let l = value_of(&mut left, dp)?;
            let r = value_of(&mut right, dp)?;
            Ok(Some(dp.with_value(arithmetic(op, &l, &r)?)))
        }),
    }
}

fn as_bool(value: &Value, operation: &str) -> TransformResult<bool> {
    value.as_bool().ok_or_else(|| {
        TransformError::Type(format!(
            "'{}' requires a boolean, got {}",
            operation,
            type_name(value)
        ))
    })
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> TransformResult<bool> {
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return Ok(match op {
            BinaryOp::Eq => a == b,
            BinaryOp::Ne => a != b,
            BinaryOp::Lt => a < b,
            BinaryOp::Le => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        });
    }

    match op {
        BinaryOp::Eq => Ok(l == r),
        BinaryOp::Ne => Ok(l != r),
        _ => {
            let ordering: Ordering = match (l, r) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    return Err(TransformError::Type(format!(
                        "cannot compare {} {} {}",
                        type_name(l),
                        op,
                        type_name(r)
                    )))
                }
            };
            Ok(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> TransformResult<Value> {
    let operation = format!("'{}'", op);
    let a = as_number(l, &operation)?;
    let b = as_number(r, &operation)?;
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        _ => {
            if b == 0.0 {
                return Err(TransformError::Eval("division by zero".to_string()));
            }
            a / b
        }
    };
    Ok(number_value(result))
}

/// Write `value` at `path` inside `doc`, creating missing object members
fn assign(doc: &mut Value, path: &[PathSegment], value: Value) -> TransformResult<()> {
    let Some((first, rest)) = path.split_first() else {
        *doc = value;
        return Ok(());
    };

    let slot = match first {
        PathSegment::Key(key) => {
            if doc.is_null() {
                *doc = Value::Object(Map::new());
            }
            match doc {
                Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                other => {
                    return Err(TransformError::Type(format!(
                        "cannot set key {:?} on {}",
                        key,
                        type_name(other)
                    )))
                }
            }
        }
        PathSegment::Index(i) => match doc {
            Value::Array(items) => {
                let len = items.len();
                items.get_mut(*i).ok_or_else(|| {
                    TransformError::Eval(format!("index {} out of bounds for array of {}", i, len))
                })?
            }
            other => {
                return Err(TransformError::Type(format!(
                    "cannot set index {} on {}",
                    i,
                    type_name(other)
                )))
            }
        },
    };
    assign(slot, rest, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(source: &str, values: Vec<Value>) -> TransformResult<Vec<Value>> {
        let mut pipeline = compile(source, &FunctionRegistry::with_builtins())?;
        let mut out = Vec::new();
        for (i, v) in values.into_iter().enumerate() {
            if let Some(dp) = pipeline.apply(&Datapoint::new(i as f64, v))? {
                out.push(dp.value);
            }
        }
        Ok(out)
    }

    #[test]
    fn test_filter() {
        let out = run(
            "if($[x] > 3)",
            vec![json!({"x": 1}), json!({"x": 5}), json!({"x": 10})],
        )
        .unwrap();
        assert_eq!(out, vec![json!({"x": 5}), json!({"x": 10})]);
    }

    #[test]
    fn test_filter_requires_boolean() {
        let err = run("if($[x])", vec![json!({"x": 1})]).unwrap_err();
        assert!(matches!(err, TransformError::Type(_)));
    }

    #[test]
    fn test_filter_keeps_metadata() {
        let mut pipeline = compile("if($ > 0) | $ * 2", &FunctionRegistry::new()).unwrap();
        let dp = Datapoint::new(7.0, 4).duration(2.0).actor("bob");
        let out = pipeline.apply(&dp).unwrap().unwrap();
        assert_eq!(out.timestamp, 7.0);
        assert_eq!(out.duration, 2.0);
        assert_eq!(out.actor.as_deref(), Some("bob"));
        assert_eq!(out.value, json!(8));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            run("($[c] * 9 / 5) + 32", vec![json!({"c": 100})]).unwrap(),
            vec![json!(212)]
        );
        assert_eq!(run("-$ + 0.5", vec![json!(1)]).unwrap(), vec![json!(-0.5)]);
        assert!(matches!(
            run("$ + 1", vec![json!("a")]),
            Err(TransformError::Type(_))
        ));
        assert!(matches!(
            run("$ / 0", vec![json!(1)]),
            Err(TransformError::Eval(_))
        ));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(
            run("$ == 1", vec![json!(1), json!(1.0), json!("1")]).unwrap(),
            vec![json!(true), json!(true), json!(false)]
        );
        assert_eq!(run("$ < 'b'", vec![json!("a")]).unwrap(), vec![json!(true)]);
        assert!(matches!(
            run("$ < 1", vec![json!("a")]),
            Err(TransformError::Type(_))
        ));
        assert_eq!(
            run("has(a) and not $[a, muted]", vec![json!({"a": {"muted": false}}), json!({})])
                .unwrap(),
            vec![json!(true), json!(false)]
        );
        // Short-circuit skips the right side entirely
        assert_eq!(run("false and $ + 1", vec![json!("x")]).unwrap(), vec![json!(false)]);
        assert!(matches!(
            run("$ or true", vec![json!(1)]),
            Err(TransformError::Type(_))
        ));
    }

    #[test]
    fn test_get_missing_is_null() {
        assert_eq!(
            run("$[a, 2]", vec![json!({"a": [1]}), json!(3)]).unwrap(),
            vec![Value::Null, Value::Null]
        );
    }

    #[test]
    fn test_set() {
        assert_eq!(
            run("set($[f], $[c] * 2)", vec![json!({"c": 4})]).unwrap(),
            vec![json!({"c": 4, "f": 8})]
        );
        assert_eq!(
            run("set($[a, b], 1)", vec![json!({})]).unwrap(),
            vec![json!({"a": {"b": 1}})]
        );
        assert_eq!(run("set($, 'x')", vec![json!(1)]).unwrap(), vec![json!("x")]);
        assert!(matches!(
            run("set($[a], 1)", vec![json!(5)]),
            Err(TransformError::Type(_))
        ));
        assert!(matches!(
            run("set($[3], 1)", vec![json!([0])]),
            Err(TransformError::Eval(_))
        ));
    }

    #[test]
    fn test_pipeline_chains_left_to_right() {
        assert_eq!(
            run("$[v] | if($ >= 2) | $ * 10", vec![json!({"v": 1}), json!({"v": 2})]).unwrap(),
            vec![json!(20)]
        );
    }

    #[test]
    fn test_filtered_sub_expression_is_an_error() {
        assert!(matches!(
            run("if($ > 1) + 1", vec![json!(0)]),
            Err(TransformError::Eval(_))
        ));
    }

    #[test]
    fn test_compile_errors() {
        let registry = FunctionRegistry::with_builtins();
        assert!(matches!(
            compile("nope()", &registry),
            Err(TransformError::UnknownFunction(name)) if name == "nope"
        ));
        assert!(matches!(
            compile("abs()", &registry),
            Err(TransformError::Arity { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            compile("$ +", &registry),
            Err(TransformError::Syntax { .. })
        ));
    }

    #[test]
    fn test_source_is_kept() {
        let pipeline = compile("count", &FunctionRegistry::with_builtins()).unwrap();
        assert_eq!(pipeline.source(), "count");
    }
}
