//! Typed extraction from JSON tool arguments.

use serde_json::{Map, Value};

use super::ToolError;

/// Argument set passed to a tool.
pub type Args = Map<String, Value>;

/// Interpret the raw `arguments` value. Absent or null means no arguments.
pub fn as_object(arguments: Option<&Value>) -> Result<Args, ToolError> {
    match arguments {
        None | Some(Value::Null) => Ok(Args::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(ToolError::InvalidArguments(
            "arguments must be an object".to_string(),
        )),
    }
}

/// Integer argument. Integral floats are accepted since JSON hosts often
/// send every number as a double.
pub fn get_int(args: &Args, key: &str) -> Result<Option<i64>, ToolError> {
    let value = match args.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };

    let invalid = || ToolError::InvalidArguments(format!("{key} must be an integer"));

    let Value::Number(number) = value else {
        return Err(invalid());
    };

    if let Some(n) = number.as_i64() {
        return Ok(Some(n));
    }

    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            Ok(Some(f as i64))
        }
        _ => Err(invalid()),
    }
}

pub fn get_port(args: &Args, key: &str) -> Result<Option<u16>, ToolError> {
    get_int(args, key)?
        .map(|n| {
            u16::try_from(n)
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| {
                    ToolError::InvalidArguments(format!("{key} must be between 1 and 65535"))
                })
        })
        .transpose()
}

pub fn require_port(args: &Args, key: &str) -> Result<u16, ToolError> {
    get_port(args, key)?.ok_or_else(|| ToolError::InvalidArguments(format!("{key} is required")))
}

pub fn get_string(args: &Args, key: &str) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ToolError::InvalidArguments(format!(
            "{key} must be a string"
        ))),
    }
}

pub fn get_bool(args: &Args, key: &str) -> Result<Option<bool>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ToolError::InvalidArguments(format!("{key} must be a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn args(value: Value) -> Args {
        as_object(Some(&value)).unwrap()
    }

    #[test]
    fn missing_arguments_are_empty() {
        assert!(as_object(None).unwrap().is_empty());
        assert!(as_object(Some(&Value::Null)).unwrap().is_empty());
        assert!(as_object(Some(&json!([1, 2]))).is_err());
    }

    #[rstest]
    #[case(json!({"p": 8080}), Some(8080))]
    #[case(json!({"p": 8080.0}), Some(8080))]
    #[case(json!({"p": -3}), Some(-3))]
    #[case(json!({}), None)]
    #[case(json!({"p": null}), None)]
    fn ints(#[case] input: Value, #[case] expected: Option<i64>) {
        assert_eq!(get_int(&args(input), "p").unwrap(), expected);
    }

    #[rstest]
    #[case(json!({"p": 1.5}))]
    #[case(json!({"p": "8080"}))]
    #[case(json!({"p": true}))]
    fn non_integers_rejected(#[case] input: Value) {
        assert!(matches!(
            get_int(&args(input), "p"),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[rstest]
    #[case(json!({"port": 0}))]
    #[case(json!({"port": 65536}))]
    #[case(json!({"port": -1}))]
    fn ports_out_of_range(#[case] input: Value) {
        assert!(get_port(&args(input), "port").is_err());
    }

    #[test]
    fn required_port() {
        assert_eq!(require_port(&args(json!({"port": 443})), "port").unwrap(), 443);
        let err = require_port(&args(json!({})), "port").unwrap_err();
        assert_eq!(err.to_string(), "invalid arguments: port is required");
    }

    #[test]
    fn strings_and_bools() {
        let a = args(json!({"host": "example.com", "flag": false, "n": 1}));
        assert_eq!(get_string(&a, "host").unwrap().as_deref(), Some("example.com"));
        assert_eq!(get_string(&a, "missing").unwrap(), None);
        assert!(get_string(&a, "n").is_err());
        assert_eq!(get_bool(&a, "flag").unwrap(), Some(false));
        assert!(get_bool(&a, "host").is_err());
    }
}
