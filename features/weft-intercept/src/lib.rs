//! Weft Intercept wraps resolved instances in proxies that run ordered
//! behaviors around their method calls.
//!
//! The crate is split into the following components:
//!
//! 1. Calls - the erased method-call representation ([call::MethodCall])
//! 2. Rules - predicates choosing which methods a handler set wraps
//! 3. Pipeline - nested call handlers with a continuation ([pipeline])
//! 4. Proxy - mechanism validation and container integration ([proxy])
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_intercept::{
//!     returns, take_return, AnyRule, ArgBag, CallHandler, CallReturn, InterceptionPolicy,
//!     MethodCall, MethodProfile, Next,
//! };
//!
//! struct Upper;
//! impl CallHandler for Upper {
//!     fn invoke(&self, call: &mut MethodCall, next: Next<'_>) -> CallReturn {
//!         let result = next.invoke(call)?;
//!         let text = take_return::<String>(result)?;
//!         returns(text.to_uppercase())
//!     }
//! }
//!
//! let pipelines = InterceptionPolicy::new()
//!     .with(vec![Arc::new(AnyRule)], vec![Arc::new(Upper)])
//!     .pipelines_for(&[MethodProfile::new("greet")]);
//!
//! let mut call = MethodCall::new("greet", ArgBag::new().with("weft".to_string()));
//! let result = pipelines
//!     .invoke(&mut call, |call| {
//!         let name: &String = call.args.get(0)?;
//!         returns(format!("hello {name}"))
//!     })
//!     .unwrap();
//! assert_eq!(take_return::<String>(result).unwrap(), "HELLO WEFT");
//! ```

pub mod call;
pub mod errors;
pub mod pipeline;
pub mod proxy;
pub mod rules;

pub use call::{returns, take_return, ArgBag, CallError, CallReturn, MethodCall, MethodProfile, ReturnValue};
pub use errors::InterceptError;
pub use pipeline::{CallHandler, HandlerPipeline, InterceptionPolicy, Next, PipelineSet};
pub use proxy::{build_pipelines, intercept, Mechanism};
pub use rules::{AnyRule, MatchingRule, MemberNameRule, NotRule, PrefixRule};
