//! Transform language
//!
//! A small expression language evaluated while datapoints stream out of a read:
//!
//! - **lexer** / **parser**: text to [`Expr`] pipeline stages
//! - **compile**: stages to a [`Pipeline`] of boxed closures
//! - **registry**: named functions available to `name(args)` calls
//! - **executor**: [`TransformIterator`] wrapping a datapoint iterator
//!
//! # Example
//!
//! ```rust
//! use spandb::storage::Datapoint;
//! use spandb::transform::{compile, FunctionRegistry};
//! use serde_json::json;
//!
//! let mut pipeline = compile("if($[x] > 3) | $[x]", &FunctionRegistry::with_builtins()).unwrap();
//! let out = pipeline.apply(&Datapoint::new(1.0, json!({"x": 5}))).unwrap();
//! assert_eq!(out.unwrap().value, json!(5));
//! ```

pub mod ast;
pub mod compile;
pub mod error;
pub mod executor;
pub mod lexer;
pub mod parser;
pub mod registry;

pub use ast::{BinaryOp, Expr, PathSegment};
pub use compile::{compile, stage, value_of, BoxedStage, Pipeline, Stage};
pub use error::{TransformError, TransformResult};
pub use executor::TransformIterator;
pub use parser::parse;
pub use registry::{check_arity, FunctionConstructor, FunctionRegistry};
