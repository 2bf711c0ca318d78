//! Expression tree evaluation

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::model::RequestContext;

/// Outcome of one statement for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyEvalResult {
    /// Dominant deny; vetoes the whole evaluation
    Never,
    Deny,
    Allow,
    /// Statement missing, condition defaulted, or evaluation failed
    Default,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub statements: HashMap<String, Statement>,
    #[serde(default)]
    pub defaults: HashMap<String, bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default)]
    pub dominant: bool,
    #[serde(rename = "defaultOnTrue", default)]
    pub default_on_true: bool,
    #[serde(rename = "defaultOnFalse", default)]
    pub default_on_false: bool,
    pub condition: Expr,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expr {
    pub op: String,
    #[serde(default)]
    pub args: Vec<Expr>,
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<Value>,
}

impl Policy {
    /// Evaluate one action. A missing statement is `Default`.
    pub fn test(&self, ctx: &RequestContext, action: &str) -> PolicyEvalResult {
        let Some(statement) = self.statements.get(action) else {
            return PolicyEvalResult::Default;
        };
        statement.test(ctx)
    }
}

impl Statement {
    pub fn test(&self, ctx: &RequestContext) -> PolicyEvalResult {
        let result = match eval(&self.condition, ctx) {
            Ok(Value::Bool(b)) => b,
            // non-boolean condition or evaluation error: never an allow
            _ => return PolicyEvalResult::Default,
        };

        if result {
            if self.default_on_true {
                PolicyEvalResult::Default
            } else {
                PolicyEvalResult::Allow
            }
        } else if self.default_on_false {
            PolicyEvalResult::Default
        } else if self.dominant {
            PolicyEvalResult::Never
        } else {
            PolicyEvalResult::Deny
        }
    }
}

/// Reduce an ordered list of results: any `Never` vetoes, otherwise the
/// first non-default result wins, otherwise the action's default.
pub fn summarize(
    results: &[PolicyEvalResult],
    action: &str,
    defaults: &HashMap<String, bool>,
) -> bool {
    if results.contains(&PolicyEvalResult::Never) {
        return false;
    }
    for result in results {
        match result {
            PolicyEvalResult::Allow => return true,
            PolicyEvalResult::Deny => return false,
            _ => {}
        }
    }
    defaults.get(action).copied().unwrap_or(false)
}

fn eval(expr: &Expr, ctx: &RequestContext) -> Result<Value, String> {
    match expr.op.as_str() {
        "And" => {
            for arg in &expr.args {
                if !truthy(&eval(arg, ctx)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "Or" => {
            for arg in &expr.args {
                if truthy(&eval(arg, ctx)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "Not" => {
            let arg = expr.args.first().ok_or("Not requires one argument")?;
            Ok(Value::Bool(!truthy(&eval(arg, ctx)?)))
        }
        "Eq" => {
            let (a, b) = two_args(expr)?;
            Ok(Value::Bool(eval(a, ctx)? == eval(b, ctx)?))
        }
        "In" => {
            let (needle, haystack) = two_args(expr)?;
            let needle = eval(needle, ctx)?;
            match eval(haystack, ctx)? {
                Value::Array(items) => Ok(Value::Bool(items.contains(&needle))),
                _ => Err("In requires an array on the right".into()),
            }
        }
        "Contains" => {
            let (haystack, needle) = two_args(expr)?;
            let needle = eval(needle, ctx)?;
            match eval(haystack, ctx)? {
                Value::Array(items) => Ok(Value::Bool(items.contains(&needle))),
                Value::String(s) => match needle {
                    Value::String(n) => Ok(Value::Bool(s.contains(&n))),
                    _ => Err("Contains on a string requires a string needle".into()),
                },
                _ => Err("Contains requires an array or string".into()),
            }
        }
        "Const" => expr.constant.clone().ok_or_else(|| "Const without value".into()),
        "LoadParam" => Ok(lookup(
            &Value::Object(ctx.params.clone()),
            expr.key()?,
        )),
        "LoadSelf" => {
            let key = expr.key()?;
            Ok(ctx
                .self_resource
                .as_ref()
                .map(|v| lookup(v, key))
                .unwrap_or(Value::Null))
        }
        "LoadResource" => {
            let key = expr.key()?;
            Ok(ctx
                .resource
                .as_ref()
                .map(|v| lookup(v, key))
                .unwrap_or(Value::Null))
        }
        "LoadDocument" => {
            let key = expr.key()?;
            Ok(ctx
                .document
                .as_ref()
                .map(|v| lookup(v, key))
                .unwrap_or(Value::Null))
        }
        "LoadRequester" => {
            let requester = ctx
                .requester
                .as_ref()
                .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            Ok(lookup(&requester, expr.key()?))
        }
        other => Err(format!("unknown operator: {other}")),
    }
}

impl Expr {
    fn key(&self) -> Result<&str, String> {
        self.constant
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| format!("{} requires a string key", self.op))
    }
}

fn two_args(expr: &Expr) -> Result<(&Expr, &Expr), String> {
    match expr.args.as_slice() {
        [a, b] => Ok((a, b)),
        _ => Err(format!("{} requires two arguments", expr.op)),
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Dotted-path lookup into a JSON value.
fn lookup(value: &Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use serde_json::json;

    fn ctx_with_tag(tag: &str) -> RequestContext {
        RequestContext {
            requester: Some(Entity {
                id: "con1requester".into(),
                domain: "local.example.com".into(),
                tag: tag.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn parse(raw: &str) -> Expr {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn operators_evaluate() {
        let ctx = RequestContext::default();
        let expr = parse(
            r#"{"op":"And","args":[
                {"op":"Const","const":true},
                {"op":"Not","args":[{"op":"Const","const":false}]}
            ]}"#,
        );
        assert_eq!(eval(&expr, &ctx).unwrap(), json!(true));
    }

    #[test]
    fn requester_tag_check() {
        let expr = parse(
            r#"{"op":"Contains","args":[
                {"op":"LoadRequester","const":"tag"},
                {"op":"Const","const":"member"}
            ]}"#,
        );
        assert_eq!(eval(&expr, &ctx_with_tag("member,core")).unwrap(), json!(true));
        assert_eq!(eval(&expr, &ctx_with_tag("")).unwrap(), json!(false));
    }

    #[test]
    fn in_over_params() {
        let mut ctx = RequestContext::default();
        ctx.params.insert("allowlist".into(), json!(["con1a", "con1b"]));
        let expr = parse(
            r#"{"op":"In","args":[
                {"op":"Const","const":"con1a"},
                {"op":"LoadParam","const":"allowlist"}
            ]}"#,
        );
        assert_eq!(eval(&expr, &ctx).unwrap(), json!(true));
    }

    #[test]
    fn load_self_dotted_path() {
        let ctx = RequestContext {
            self_resource: Some(json!({"author": "con1me", "nested": {"k": 7}})),
            ..Default::default()
        };
        let expr = parse(r#"{"op":"LoadSelf","const":"nested.k"}"#);
        assert_eq!(eval(&expr, &ctx).unwrap(), json!(7));
    }

    #[test]
    fn statement_maps_condition_to_result() {
        let allow = Statement {
            condition: parse(r#"{"op":"Const","const":true}"#),
            ..Default::default()
        };
        assert_eq!(allow.test(&RequestContext::default()), PolicyEvalResult::Allow);

        let deny = Statement {
            condition: parse(r#"{"op":"Const","const":false}"#),
            ..Default::default()
        };
        assert_eq!(deny.test(&RequestContext::default()), PolicyEvalResult::Deny);

        let veto = Statement {
            dominant: true,
            condition: parse(r#"{"op":"Const","const":false}"#),
            ..Default::default()
        };
        assert_eq!(veto.test(&RequestContext::default()), PolicyEvalResult::Never);

        let defaulted = Statement {
            default_on_false: true,
            condition: parse(r#"{"op":"Const","const":false}"#),
            ..Default::default()
        };
        assert_eq!(
            defaulted.test(&RequestContext::default()),
            PolicyEvalResult::Default
        );
    }

    #[test]
    fn evaluation_error_defaults() {
        let statement = Statement {
            condition: parse(r#"{"op":"Frobnicate"}"#),
            ..Default::default()
        };
        assert_eq!(
            statement.test(&RequestContext::default()),
            PolicyEvalResult::Default
        );
    }

    #[test]
    fn summarize_veto_and_ordering() {
        use PolicyEvalResult::*;
        let defaults = HashMap::from([("act".to_string(), true)]);
        assert!(!summarize(&[Allow, Never], "act", &defaults));
        assert!(summarize(&[Default, Allow, Deny], "act", &defaults));
        assert!(!summarize(&[Default, Deny, Allow], "act", &defaults));
        assert!(summarize(&[Default, Default], "act", &defaults));
        assert!(!summarize(&[Default], "other", &defaults));
    }
}
