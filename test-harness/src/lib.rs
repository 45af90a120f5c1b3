// Demo parameter mutations driven by `paramctl`.
use conparam_wire::{Params, Value};
use serde_json::Number;

/// Suffix appended to the string parameter on every step.
pub const STRING_SUFFIX: &str = " updated";

/// Parameters a fresh demo client starts with.
pub fn demo_defaults(string_key: &str, number_key: &str) -> Params {
    let mut params = Params::new();
    params.insert(string_key.to_string(), Value::from("value1"));
    params.insert(number_key.to_string(), Value::from(2));
    params
}

/// Next values for one demo step: the string gets [`STRING_SUFFIX`], the number doubles.
///
/// Keys that are missing or hold another kind of value are left out.
pub fn next_step(current: &Params, string_key: &str, number_key: &str) -> Params {
    let mut next = Params::new();
    if let Some(Value::String(text)) = current.get(string_key) {
        next.insert(
            string_key.to_string(),
            Value::from(format!("{text}{STRING_SUFFIX}")),
        );
    }
    if let Some(Value::Number(number)) = current.get(number_key)
        && let Some(doubled) = double(number)
    {
        next.insert(number_key.to_string(), doubled);
    }
    next
}

// None once the value no longer fits.
fn double(number: &Number) -> Option<Value> {
    if let Some(n) = number.as_i64() {
        return n.checked_mul(2).map(Value::from);
    }
    if let Some(n) = number.as_u64() {
        return n.checked_mul(2).map(Value::from);
    }
    number
        .as_f64()
        .and_then(|n| Number::from_f64(n * 2.0))
        .map(Value::Number)
}
