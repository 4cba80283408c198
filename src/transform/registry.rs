//! Named transform functions
//!
//! The compiler resolves every `name(args)` call through a [`FunctionRegistry`]
//! handed to it by the caller. A constructor receives the compiled argument
//! stages and returns the stage for the call, so stateful functions keep their
//! state inside the returned closure.

use crate::storage::types::Datapoint;
use crate::transform::compile::{as_number, number_value, stage, value_of, BoxedStage};
use crate::transform::error::{TransformError, TransformResult};
use serde_json::Value;
use std::collections::HashMap;

/// Builds the stage for one call site
pub type FunctionConstructor =
    Box<dyn Fn(Vec<BoxedStage>) -> TransformResult<BoxedStage> + Send + Sync>;

pub struct FunctionRegistry {
    functions: HashMap<String, FunctionConstructor>,
}

impl FunctionRegistry {
    /// Registry with no functions
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry with `count`, `sum` and `abs`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register("count", |args| {
            check_arity("count", &args, 0)?;
            let mut count: u64 = 0;
            Ok(stage(move |dp: &Datapoint| {
                count += 1;
                Ok(Some(dp.with_value(Value::from(count))))
            }))
        });

        registry.register("sum", |args| {
            let mut arg = single_arg("sum", args)?;
            let mut total = 0.0;
            Ok(stage(move |dp: &Datapoint| {
                total += as_number(&value_of(&mut arg, dp)?, "sum()")?;
                Ok(Some(dp.with_value(number_value(total))))
            }))
        });

        registry.register("abs", |args| {
            let mut arg = single_arg("abs", args)?;
            Ok(stage(move |dp: &Datapoint| {
                let n = as_number(&value_of(&mut arg, dp)?, "abs()")?;
                Ok(Some(dp.with_value(number_value(n.abs()))))
            }))
        });

        registry
    }

    /// Add or replace a function
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(Vec<BoxedStage>) -> TransformResult<BoxedStage> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Box::new(constructor));
    }

    pub fn lookup(&self, name: &str) -> Option<&FunctionConstructor> {
        self.functions.get(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Fail with an arity error unless exactly `expected` arguments were given
pub fn check_arity(name: &str, args: &[BoxedStage], expected: usize) -> TransformResult<()> {
    if args.len() != expected {
        return Err(TransformError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn single_arg(name: &str, args: Vec<BoxedStage>) -> TransformResult<BoxedStage> {
    check_arity(name, &args, 1)?;
    args.into_iter().next().ok_or_else(|| TransformError::Arity {
        name: name.to_string(),
        expected: 1,
        got: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::compile::compile;
    use serde_json::json;

    fn run(registry: &FunctionRegistry, source: &str, values: &[Value]) -> Vec<Value> {
        let mut pipeline = compile(source, registry).unwrap();
        values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| pipeline.apply(&Datapoint::new(i as f64, v.clone())).unwrap())
            .map(|dp| dp.value)
            .collect()
    }

    #[test]
    fn test_builtins() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["abs", "count", "sum"]);

        let values = [json!(-2), json!(3), json!(-4.5)];
        assert_eq!(run(&registry, "count", &values), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(run(&registry, "sum($)", &values), vec![json!(-2), json!(1), json!(-3.5)]);
        assert_eq!(run(&registry, "abs($)", &values), vec![json!(2), json!(3), json!(4.5)]);
    }

    #[test]
    fn test_count_after_filter() {
        let registry = FunctionRegistry::default();
        let values = [json!(1), json!(5), json!(7), json!(0)];
        assert_eq!(run(&registry, "if($ > 2) | count()", &values), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_each_compile_gets_fresh_state() {
        let registry = FunctionRegistry::with_builtins();
        let values = [json!(0), json!(0)];
        assert_eq!(run(&registry, "count", &values), vec![json!(1), json!(2)]);
        assert_eq!(run(&registry, "count", &values), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_custom_function() {
        let mut registry = FunctionRegistry::new();
        registry.register("double", |args| {
            let mut arg = single_arg("double", args)?;
            Ok(stage(move |dp: &Datapoint| {
                let n = as_number(&value_of(&mut arg, dp)?, "double()")?;
                Ok(Some(dp.with_value(number_value(n * 2.0))))
            }))
        });

        assert_eq!(run(&registry, "double($[v])", &[json!({"v": 21})]), vec![json!(42)]);
        assert!(matches!(
            compile("count", &registry),
            Err(TransformError::UnknownFunction(_))
        ));
        assert!(matches!(
            compile("double(1, 2)", &registry),
            Err(TransformError::Arity { expected: 1, got: 2, .. })
        ));
    }

    #[test]
    fn test_sum_rejects_non_numbers() {
        let mut pipeline = compile("sum($)", &FunctionRegistry::with_builtins()).unwrap();
        assert!(matches!(
            pipeline.apply(&Datapoint::new(0.0, "x")),
            Err(TransformError::Type(_))
        ));
    }
}
