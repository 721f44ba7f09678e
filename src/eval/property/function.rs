use super::value::Value;
use crate::eval::error::EvalError;

/// A synchronous function callable from condition expressions,
/// e.g. `event_count('app_start') > 3`.
pub trait ConditionFunction: Send + Sync {
    /// Evaluate with already-evaluated arguments. Implementations check their
    /// own arity and argument types.
    fn call(&self, args: &[Value]) -> Result<Value, EvalError>;
}

impl<F> ConditionFunction for F
where
    F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        self(args)
    }
}

/// Extract a string argument at `index`
pub fn string_arg<'a>(function: &str, args: &'a [Value], index: usize) -> Result<&'a str, EvalError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(EvalError::invalid_arguments(
            function,
            format!("argument {} must be a string, got {}", index + 1, other.type_name()),
        )),
        None => Err(EvalError::invalid_arguments(
            function,
            format!("missing argument {}", index + 1),
        )),
    }
}

/// Extract a numeric argument at `index`
pub fn number_arg(function: &str, args: &[Value], index: usize) -> Result<f64, EvalError> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(EvalError::invalid_arguments(
            function,
            format!("argument {} must be a number, got {}", index + 1, other.type_name()),
        )),
        None => Err(EvalError::invalid_arguments(
            function,
            format!("missing argument {}", index + 1),
        )),
    }
}

/// Fail unless exactly `expected` arguments were supplied
pub fn expect_arity(function: &str, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() != expected {
        return Err(EvalError::invalid_arguments(
            function,
            format!("expected {} argument(s), got {}", expected, args.len()),
        ));
    }
    Ok(())
}
