//! 数学运算能力
//!
//! 操作数来源: `target` 非空时按 `;` 分割，否则取参数值 (按参数名排序)。

use async_trait::async_trait;
use tracing::debug;

use pad_common::{bool_text, Outcome, ResolvedAction};

use crate::{Capability, CapabilityError, CapabilityKind, Result, Session};

const VERBS: &[&str] = &[
    "add", "subtract", "multiply", "divide", "power", "modulo", "round", "compare",
];

/// 数学运算能力
#[derive(Debug, Default)]
pub struct MathCapability;

impl MathCapability {
    pub fn new() -> Self {
        Self
    }

    /// 原始操作数 (未转换为数字)
    fn raw_operands(action: &ResolvedAction) -> Vec<String> {
        if !action.target.trim().is_empty() {
            action
                .target
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            action.params.values().map(|v| v.trim().to_string()).collect()
        }
    }

    fn numbers(action: &ResolvedAction, expected_count: Option<usize>) -> Result<Vec<f64>> {
        let raw = Self::raw_operands(action);

        if raw.is_empty() {
            return Err(CapabilityError::InvalidInput("缺少数值操作数".to_string()));
        }
        if let Some(count) = expected_count {
            if raw.len() != count {
                return Err(CapabilityError::InvalidInput(format!(
                    "需要 {} 个操作数, 实际 {}: {:?}",
                    count,
                    raw.len(),
                    raw
                )));
            }
        }

        raw.iter()
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| CapabilityError::InvalidInput(format!("非数值输入: {}", s)))
            })
            .collect()
    }

    fn evaluate(action: &ResolvedAction) -> Result<String> {
        let verb = action.verb.trim().to_lowercase();

        let value = match verb.as_str() {
            "add" | "sum" => Self::numbers(action, None)?.iter().sum::<f64>(),
            "subtract" | "minus" => {
                let n = Self::numbers(action, Some(2))?;
                n[0] - n[1]
            }
            "multiply" => Self::numbers(action, None)?.iter().product::<f64>(),
            "divide" | "div" => {
                let n = Self::numbers(action, Some(2))?;
                if n[1] == 0.0 {
                    return Err(CapabilityError::InvalidInput("除数为零".to_string()));
                }
                n[0] / n[1]
            }
            "power" | "pow" => {
                let n = Self::numbers(action, Some(2))?;
                n[0].powf(n[1])
            }
            "modulo" | "mod" => {
                let n = Self::numbers(action, Some(2))?;
                if n[1] == 0.0 {
                    return Err(CapabilityError::InvalidInput("除数为零".to_string()));
                }
                floored_mod(n[0], n[1])
            }
            "round" => {
                let n = Self::numbers(action, Some(2))?;
                let factor = 10f64.powi(n[1] as i32);
                (n[0] * factor).round() / factor
            }
            "compare" => {
                let raw = Self::raw_operands(action);
                if raw.len() != 2 {
                    return Err(CapabilityError::InvalidInput(format!(
                        "compare 需要 2 个操作数, 实际 {}",
                        raw.len()
                    )));
                }
                return Ok(bool_text(raw[0] == raw[1]).to_string());
            }
            _ => {
                return Err(CapabilityError::UnsupportedVerb {
                    capability: "math".to_string(),
                    verb: action.verb.clone(),
                })
            }
        };

        if !value.is_finite() {
            return Err(CapabilityError::InvalidInput(format!(
                "运算结果不是有限数: {}",
                value
            )));
        }

        Ok(format_number(value))
    }
}

#[async_trait]
impl Capability for MathCapability {
    async fn execute(&self, action: &ResolvedAction, _session: &mut Session) -> Result<Outcome> {
        let output = Self::evaluate(action)?;
        debug!("数学运算 {} => {}", action.verb, output);
        Ok(Outcome::passed(output))
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::MathEval
    }

    fn verbs(&self) -> &'static [&'static str] {
        VERBS
    }
}

/// 结果符号与除数一致的取模
fn floored_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// 数字的最短十进制表示 (5.0 => "5")
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // 统一 -0 与 0
        return "0".to_string();
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(verb: &str, target: &str) -> Result<String> {
        MathCapability::evaluate(&ResolvedAction::new("m", "math", verb).with_target(target))
    }

    #[test]
    fn test_add_from_params() {
        let action = ResolvedAction::new("a1", "math", "add")
            .with_param("x", "2")
            .with_param("y", "3");
        assert_eq!(MathCapability::evaluate(&action).unwrap(), "5");
    }

    #[test]
    fn test_params_are_ordered_by_key() {
        let action = ResolvedAction::new("a1", "math", "subtract")
            .with_param("b", "3")
            .with_param("a", "10");
        assert_eq!(MathCapability::evaluate(&action).unwrap(), "7");
    }

    #[test]
    fn test_target_operands_take_precedence() {
        let action = ResolvedAction::new("a1", "math", "multiply")
            .with_target("2;3;4")
            .with_param("ignored", "100");
        assert_eq!(MathCapability::evaluate(&action).unwrap(), "24");
    }

    #[test]
    fn test_binary_operations() {
        assert_eq!(eval("minus", "10;4").unwrap(), "6");
        assert_eq!(eval("div", "5;2").unwrap(), "2.5");
        assert_eq!(eval("power", "2;10").unwrap(), "1024");
        assert_eq!(eval("modulo", "7;3").unwrap(), "1");
        assert_eq!(eval("modulo", "-7;3").unwrap(), "2");
        assert_eq!(eval("round", "3.14159;2").unwrap(), "3.14");
    }

    #[test]
    fn test_compare_uses_raw_strings() {
        assert_eq!(eval("compare", "abc;abc").unwrap(), "True");
        assert_eq!(eval("compare", "1;1.0").unwrap(), "False");
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(eval("divide", "1;0"), Err(CapabilityError::InvalidInput(_))));
        assert!(matches!(eval("modulo", "1;0"), Err(CapabilityError::InvalidInput(_))));
    }

    #[test]
    fn test_invalid_operands() {
        assert!(eval("add", "").is_err());
        assert!(eval("add", "1;x").is_err());
        assert!(eval("subtract", "1;2;3").is_err());
    }

    #[test]
    fn test_unsupported_verb() {
        let err = eval("sqrt", "4").unwrap_err();
        assert!(matches!(err, CapabilityError::UnsupportedVerb { .. }));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.25), "0.25");
    }
}
