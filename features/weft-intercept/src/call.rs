use std::any::Any;

use thiserror::Error;

use weft_di::DynError;

/// Identity of one interceptable method, matched by rules at proxy-creation
/// time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodProfile {
    pub name: &'static str,
}

impl MethodProfile {
    pub fn new(name: &'static str) -> Self {
        MethodProfile { name }
    }
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("call argument {index} out of range ({len} present)")]
    OutOfRange { index: usize, len: usize },
    #[error("call argument {index} is not a '{required}'")]
    WrongType {
        index: usize,
        required: &'static str,
    },
    #[error("the return value is not a '{required}'")]
    WrongReturnType { required: &'static str },
}

/// The mutable input arguments of one intercepted call.
///
/// Handlers may read and replace arguments before delegating to the rest of
/// the pipeline.
#[derive(Default)]
pub struct ArgBag {
    values: Vec<Box<dyn Any + Send>>,
}

impl ArgBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<V: Any + Send>(mut self, value: V) -> Self {
        self.values.push(Box::new(value));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get<V: Any>(&self, index: usize) -> Result<&V, CallError> {
        let len = self.values.len();
        self.values
            .get(index)
            .ok_or(CallError::OutOfRange { index, len })?
            .downcast_ref::<V>()
            .ok_or(CallError::WrongType {
                index,
                required: std::any::type_name::<V>(),
            })
    }

    pub fn get_mut<V: Any>(&mut self, index: usize) -> Result<&mut V, CallError> {
        let len = self.values.len();
        self.values
            .get_mut(index)
            .ok_or(CallError::OutOfRange { index, len })?
            .downcast_mut::<V>()
            .ok_or(CallError::WrongType {
                index,
                required: std::any::type_name::<V>(),
            })
    }

    /// Replace one argument before the continuation runs
    pub fn set<V: Any + Send>(&mut self, index: usize, value: V) -> Result<(), CallError> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(CallError::OutOfRange { index, len })?;
        *slot = Box::new(value);
        Ok(())
    }
}

/// One method invocation travelling through the pipeline
pub struct MethodCall {
    pub method: &'static str,
    pub args: ArgBag,
}

impl MethodCall {
    pub fn new(method: &'static str, args: ArgBag) -> Self {
        MethodCall { method, args }
    }
}

/// The erased return value of the real method or a handler
pub type ReturnValue = Box<dyn Any + Send>;

/// Outcome of one pipeline stage: a return value or a propagating error
pub type CallReturn = Result<ReturnValue, DynError>;

/// Wrap a typed value as a pipeline return
pub fn returns<V: Any + Send>(value: V) -> CallReturn {
    Ok(Box::new(value))
}

/// Unwrap a typed value out of a pipeline return
pub fn take_return<V: Any>(value: ReturnValue) -> Result<V, CallError> {
    value
        .downcast::<V>()
        .map(|boxed| *boxed)
        .map_err(|_| CallError::WrongReturnType {
            required: std::any::type_name::<V>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_bag_roundtrip_and_mutation() {
        let mut args = ArgBag::new().with(5_u32).with("x".to_string());
        assert_eq!(*args.get::<u32>(0).unwrap(), 5);
        args.set(0, 9_u32).unwrap();
        assert_eq!(*args.get::<u32>(0).unwrap(), 9);
        assert!(args.get::<u64>(0).is_err());
        assert!(args.get::<u32>(2).is_err());
    }

    #[test]
    fn return_helpers_roundtrip() {
        let ret = returns("value".to_string()).unwrap();
        assert_eq!(take_return::<String>(ret).unwrap(), "value");
        let ret = returns(1_u8).unwrap();
        assert!(take_return::<u16>(ret).is_err());
    }
}
