//! Condition expression evaluator
//!
//! Evaluation is asynchronous because properties may need I/O to resolve.
//! `&&` and `||` short-circuit left to right, so a property behind a
//! short-circuited operand is never resolved and cannot fail the check.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::time::sleep_until;

use super::ast::{CompareOp, Condition, Expression, Literal};
use super::parser::parse;
use crate::eval::context::EvaluationContext;
use crate::eval::error::{EngineError, EvalError};
use crate::eval::property::{PropertyRegistry, Value};

/// Evaluate a condition expression within a context.
///
/// Fails with [`EvalError::Timeout`] if the context deadline elapses first,
/// and with [`EvalError::Cancelled`] if its token is cancelled. There is no
/// partial result in either case.
pub async fn evaluate(
    expr: &Expression,
    registry: &PropertyRegistry,
    ctx: &EvaluationContext,
) -> Result<bool, EvalError> {
    let token = ctx.token();
    let value = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(EvalError::Cancelled),
        _ = sleep_until(token.deadline()) => return Err(EvalError::Timeout(token.budget())),
        value = eval_node(expr, registry, ctx) => value?,
    };

    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::type_mismatch(format!(
            "condition must produce a bool, got {}",
            other.type_name()
        ))),
    }
}

/// Evaluate a parsed [`Condition`]
pub async fn evaluate_condition(
    condition: &Condition,
    registry: &PropertyRegistry,
    ctx: &EvaluationContext,
) -> Result<bool, EvalError> {
    let result = evaluate(condition.expression(), registry, ctx).await;
    log::debug!("[{}] '{}' => {:?}", ctx.id(), condition, result);
    result
}

/// Parse and evaluate a condition string in a fresh context
pub async fn evaluate_str(
    source: &str,
    registry: &PropertyRegistry,
    timeout: Duration,
) -> Result<bool, EngineError> {
    let expr = parse(source)?;
    let ctx = EvaluationContext::new(timeout);
    Ok(evaluate(&expr, registry, &ctx).await?)
}

fn eval_node<'a>(
    expr: &'a Expression,
    registry: &'a PropertyRegistry,
    ctx: &'a EvaluationContext,
) -> BoxFuture<'a, Result<Value, EvalError>> {
    Box::pin(async move {
        match expr {
            Expression::Literal(literal) => Ok(literal_value(literal)),
            Expression::Property(name) => registry.resolve(name, ctx).await,
            Expression::Call { name, args } => {
                let function = registry
                    .function(name)
                    .ok_or_else(|| EvalError::UnknownFunction(name.clone()))?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_node(arg, registry, ctx).await?);
                }
                function.call(&values)
            }
            Expression::Not(inner) => {
                let value = expect_bool(eval_node(inner, registry, ctx).await?, "!")?;
                Ok(Value::Bool(!value))
            }
            Expression::And(left, right) => {
                if !expect_bool(eval_node(left, registry, ctx).await?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                let right = expect_bool(eval_node(right, registry, ctx).await?, "&&")?;
                Ok(Value::Bool(right))
            }
            Expression::Or(left, right) => {
                if expect_bool(eval_node(left, registry, ctx).await?, "||")? {
                    return Ok(Value::Bool(true));
                }
                let right = expect_bool(eval_node(right, registry, ctx).await?, "||")?;
                Ok(Value::Bool(right))
            }
            Expression::Compare { left, op, right } => {
                let left = eval_node(left, registry, ctx).await?;
                let right = eval_node(right, registry, ctx).await?;
                compare(&left, *op, &right).map(Value::Bool)
            }
        }
    })
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(s.clone()),
        Literal::Number(n) => Value::Number(*n),
        Literal::Duration(d) => Value::Duration(*d),
        Literal::Boolean(b) => Value::Bool(*b),
    }
}

fn expect_bool(value: Value, operator: &str) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| {
        EvalError::type_mismatch(format!(
            "'{}' requires bool operands, got {}",
            operator,
            value.type_name()
        ))
    })
}

/// Compare two values.
///
/// Numbers and durations order and compare in seconds. Strings and bools
/// support only `==` and `!=`. Anything else is a type mismatch.
fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, EvalError> {
    if let (Some(l), Some(r)) = (left.as_seconds(), right.as_seconds()) {
        return Ok(match op {
            CompareOp::Eq => l == r,
            CompareOp::NotEq => l != r,
            CompareOp::Gt => l > r,
            CompareOp::Gte => l >= r,
            CompareOp::Lt => l < r,
            CompareOp::Lte => l <= r,
        });
    }

    let equal = match (left, right) {
        (Value::String(l), Value::String(r)) => l == r,
        (Value::Bool(l), Value::Bool(r)) => l == r,
        _ => {
            return Err(EvalError::type_mismatch(format!(
                "cannot compare {} {} {}",
                left.type_name(),
                op,
                right.type_name()
            )))
        }
    };

    match op {
        CompareOp::Eq => Ok(equal),
        CompareOp::NotEq => Ok(!equal),
        _ => Err(EvalError::type_mismatch(format!(
            "'{}' is not defined for {} values",
            op,
            left.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::DeadlineToken;
    use crate::eval::error::ProviderError;
    use crate::eval::property::{FnProvider, PropertyKind, PropertyProvider};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Provider that never resolves
    struct HangingProvider;

    #[async_trait]
    impl PropertyProvider for HangingProvider {
        fn kind(&self) -> PropertyKind {
            PropertyKind::String
        }

        async fn value(&self, _token: &DeadlineToken) -> Result<Value, ProviderError> {
            std::future::pending().await
        }
    }

    fn registry_with(pairs: Vec<(&str, Value)>) -> PropertyRegistry {
        let registry = PropertyRegistry::new();
        for (k, v) in pairs {
            registry.register_static(k, v).unwrap();
        }
        registry
    }

    async fn eval(src: &str, registry: &PropertyRegistry) -> Result<bool, EvalError> {
        let expr = parse(src).unwrap();
        let ctx = EvaluationContext::new(Duration::from_secs(1));
        evaluate(&expr, registry, &ctx).await
    }

    #[tokio::test]
    async fn test_string_equality() {
        let registry = registry_with(vec![("interface_orientation", Value::from("portrait"))]);
        assert!(!eval("interface_orientation == 'landscape'", &registry).await.unwrap());
        assert!(eval("interface_orientation == 'portrait'", &registry).await.unwrap());
        assert!(eval("interface_orientation != 'landscape'", &registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_number_comparison() {
        let registry = registry_with(vec![("battery_level", Value::Number(0.75))]);

        assert!(eval("battery_level > 0.5", &registry).await.unwrap());
        assert!(!eval("battery_level > 0.9", &registry).await.unwrap());
        assert!(eval("battery_level >= 0.75", &registry).await.unwrap());
        assert!(eval("battery_level < 1", &registry).await.unwrap());
        assert!(eval("battery_level <= 0.75", &registry).await.unwrap());
        assert!(eval("battery_level == 0.75", &registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_tiny_numbers_are_not_equal() {
        let registry = registry_with(vec![("custom_score", Value::Number(1e-300))]);

        assert!(!eval("custom_score == 0", &registry).await.unwrap());
        assert!(eval("custom_score != 0", &registry).await.unwrap());
        assert!(eval("custom_score > 0", &registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_duration_coerces_with_numbers() {
        let registry = registry_with(vec![(
            "app_install_age",
            Value::Duration(Duration::from_secs(3 * 86_400)),
        )]);

        assert!(eval("app_install_age > 2d", &registry).await.unwrap());
        assert!(eval("app_install_age == 259200", &registry).await.unwrap());
        assert!(eval("app_install_age >= 4320m", &registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_boolean_property() {
        let registry = registry_with(vec![("low_power_mode", Value::Bool(true))]);
        assert!(eval("low_power_mode", &registry).await.unwrap());
        assert!(!eval("!low_power_mode", &registry).await.unwrap());
        assert!(eval("low_power_mode == true", &registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_and_or_expressions() {
        let registry = registry_with(vec![
            ("platform", Value::from("ios")),
            ("battery_level", Value::Number(0.9)),
        ]);

        assert!(eval("platform == 'ios' && battery_level > 0.8", &registry)
            .await
            .unwrap());
        assert!(!eval("platform == 'android' && battery_level > 0.8", &registry)
            .await
            .unwrap());
        assert!(eval("platform == 'android' || battery_level > 0.8", &registry)
            .await
            .unwrap());
        assert!(!eval("platform == 'android' or battery_level > 0.95", &registry)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_short_circuit_skips_failing_property() {
        let registry = PropertyRegistry::new();
        assert!(!eval("false && missing_property == 1", &registry).await.unwrap());
        assert!(eval("true || missing_property == 1", &registry).await.unwrap());

        // The same property in a position that must be evaluated fails
        assert!(eval("true && missing_property == 1", &registry).await.is_err());
    }

    #[tokio::test]
    async fn test_short_circuit_never_calls_provider() {
        let registry = PropertyRegistry::new();
        registry
            .register_provider(
                "network_connection_type",
                Arc::new(FnProvider::new(PropertyKind::String, || {
                    panic!("provider must not be called")
                })),
            )
            .unwrap();

        assert!(!eval("false && network_connection_type == 'wifi'", &registry)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_error() {
        let registry = registry_with(vec![
            ("platform", Value::from("ios")),
            ("battery_level", Value::Number(0.5)),
        ]);

        for src in [
            "platform == 1",
            "battery_level == 'full'",
            "platform > 'android'",
            "battery_level",
            "!platform",
            "platform && true",
        ] {
            let err = eval(src, &registry).await.unwrap_err();
            assert!(
                matches!(err, EvalError::TypeMismatch(_)),
                "{} gave {:?}",
                src,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let registry = PropertyRegistry::new();
        assert_eq!(
            eval("future_helper('x')", &registry).await.unwrap_err(),
            EvalError::UnknownFunction("future_helper".into())
        );
    }

    #[tokio::test]
    async fn test_function_call() {
        let registry = PropertyRegistry::new();
        registry.register_function(
            "double",
            Arc::new(|args: &[Value]| -> Result<Value, EvalError> {
                let n = crate::eval::property::number_arg("double", args, 0)?;
                Ok(Value::Number(n * 2.0))
            }),
        );
        assert!(eval("double(21) == 42", &registry).await.unwrap());
    }

    #[tokio::test]
    async fn test_deterministic() {
        let registry = registry_with(vec![("battery_level", Value::Number(0.3))]);
        let src = "battery_level > 0.2 && !(battery_level > 0.5)";
        let first = eval(src, &registry).await.unwrap();
        for _ in 0..10 {
            assert_eq!(eval(src, &registry).await.unwrap(), first);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_times_out() {
        let registry = PropertyRegistry::new();
        registry
            .register_provider("network_connection_type", Arc::new(HangingProvider))
            .unwrap();

        let expr = parse("network_connection_type == 'wifi'").unwrap();
        let ctx = EvaluationContext::new(Duration::from_millis(200));
        let err = evaluate(&expr, &registry, &ctx).await.unwrap_err();
        assert_eq!(err, EvalError::Timeout(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let registry = PropertyRegistry::new();
        registry
            .register_provider("network_connection_type", Arc::new(HangingProvider))
            .unwrap();

        let (token, handle) = DeadlineToken::new(Duration::from_secs(60));
        let ctx = EvaluationContext::with_token(token);
        let expr = parse("network_connection_type == 'wifi'").unwrap();

        handle.cancel();
        let err = evaluate(&expr, &registry, &ctx).await.unwrap_err();
        assert_eq!(err, EvalError::Cancelled);
    }

    #[tokio::test]
    async fn test_property_used_twice_resolves_once() {
        let registry = registry_with(vec![("battery_level", Value::Number(0.5))]);
        let expr = parse("battery_level > 0.1 && battery_level < 0.9").unwrap();
        let ctx = EvaluationContext::new(Duration::from_secs(1));
        assert!(evaluate(&expr, &registry, &ctx).await.unwrap());
        assert_eq!(ctx.resolved_count(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_str_surfaces_parse_errors() {
        let registry = PropertyRegistry::new();
        let err = evaluate_str("a = 1", &registry, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }
}
