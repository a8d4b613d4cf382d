//! 定时表达式校验
//!
//! 用户以 Kubernetes CronJob 的五段式语法（或 `@daily` 等宏）提交定时表达式，
//! 本模块将其转换为 `cron` crate 的七段式语法后解析，以便在创建子对象之前发现格式错误。
//! 转换只用于校验，写入 CronJob 的仍是用户的原始表达式。

use cron::Schedule;
use std::str::FromStr;

use crate::error::{Error, Result};

/// 校验五段式定时表达式
pub fn validate_schedule(expression: &str) -> Result<()> {
    let trimmed = expression.trim();
    let expanded = expand_macro(trimmed).unwrap_or(trimmed);

    let fields: Vec<&str> = expanded.split_whitespace().collect();
    let [minute, hour, day_of_month, month, day_of_week] = fields.as_slice() else {
        return Err(Error::Schedule {
            expression: expression.to_string(),
            reason: format!("需要 5 个字段，实际为 {}", fields.len()),
        });
    };

    let day_of_week = translate_day_of_week(day_of_week).ok_or_else(|| Error::Schedule {
        expression: expression.to_string(),
        reason: format!("星期字段无效: {day_of_week}"),
    })?;

    let normalized = format!("0 {minute} {hour} {day_of_month} {month} {day_of_week} *");
    Schedule::from_str(&normalized).map_err(|e| Error::Schedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

fn expand_macro(expression: &str) -> Option<&'static str> {
    match expression {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

/// Kubernetes 的星期编号为 0-7（0 与 7 都是周日），`cron` crate 为 1-7（1 为周日）
fn translate_day_of_week(field: &str) -> Option<String> {
    let translate_value = |value: &str| -> Option<String> {
        match value.parse::<u8>() {
            Ok(n @ 0..=6) => Some((n + 1).to_string()),
            Ok(7) => Some("1".to_string()),
            Ok(_) => None,
            Err(_) => Some(value.to_string()),
        }
    };

    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let range = match range.split_once('-') {
                Some((start, end)) => {
                    let start = translate_value(start)?;
                    let end = if end == "7" { "7".to_string() } else { translate_value(end)? };
                    format!("{start}-{end}")
                }
                None => translate_value(range)?,
            };
            Some(match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            })
        })
        .collect::<Option<Vec<_>>>()
        .map(|parts| parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0 0 * * *")]
    #[case("*/5 * * * *")]
    #[case("30 2 * * 1-5")]
    #[case("0 0 * * 0")]
    #[case("0 0 * * 7")]
    #[case("@daily")]
    #[case("@hourly")]
    fn test_valid_schedules(#[case] expression: &str) {
        assert!(validate_schedule(expression).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("* * *")]
    #[case("0 0 * * * *")]
    #[case("61 0 * * *")]
    #[case("0 25 * * *")]
    #[case("0 0 * * 9")]
    #[case("every day")]
    fn test_invalid_schedules(#[case] expression: &str) {
        assert!(matches!(
            validate_schedule(expression),
            Err(Error::Schedule { .. })
        ));
    }
}
