//! Instance templates
//!
//! A branch's `instances` declaration is a list of levels. Each level yields
//! a set of sibling names; successive levels nest below each other, so
//! `[["Left", "Right"], "Pos[1,2]"]` produces `Left.Pos1`, `Left.Pos2`,
//! `Right.Pos1` and `Right.Pos2`.
//!
//! Accepted spellings:
//! - `"Row[1,4]"`: one level
//! - `["Left", "Right"]` (only plain names): one level
//! - anything else in list form: one level per item

use nom::{
    bytes::complete::take_till,
    character::complete::{char, digit1, space0},
    combinator::{all_consuming, map_res, opt, recognize},
    sequence::{delimited, pair, separated_pair},
    IResult,
};
use serde_yaml::Value;

use crate::expander::ExpansionError;

/// One nesting level of an instance declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLevel(pub Vec<String>);

impl InstanceLevel {
    /// Concrete sibling names produced by this level, in declared order
    pub fn names(&self) -> Result<Vec<String>, ExpansionError> {
        let mut names = Vec::new();
        for template in &self.0 {
            names.extend(expand_template(template)?);
        }
        if names.is_empty() {
            return Err(ExpansionError::InvalidExpansionEntry {
                entry: format!("{:?}", self.0),
                reason: "instance level yields no names".to_string(),
            });
        }
        Ok(names)
    }

    fn to_value(&self) -> Value {
        match self.0.as_slice() {
            [single] => Value::String(single.clone()),
            many => Value::Sequence(many.iter().cloned().map(Value::String).collect()),
        }
    }
}

/// Normalize a raw `instances` value into levels
pub fn parse_instances(value: &Value) -> Result<Vec<InstanceLevel>, String> {
    match value {
        Value::Null => Ok(vec![]),
        Value::String(s) => Ok(vec![InstanceLevel(vec![s.clone()])]),
        Value::Sequence(items) => {
            let plain: Option<Vec<String>> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) if !s.contains('[') => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            if let Some(names) = plain {
                if names.is_empty() {
                    return Ok(vec![]);
                }
                return Ok(vec![InstanceLevel(names)]);
            }
            items.iter().map(parse_level).collect()
        }
        other => Err(format!("expected string or list, got {}", value_kind(other))),
    }
}

fn parse_level(item: &Value) -> Result<InstanceLevel, String> {
    match item {
        Value::String(s) => Ok(InstanceLevel(vec![s.clone()])),
        Value::Sequence(names) => names
            .iter()
            .map(|n| match n {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(format!("instance name must be a string, got {}", value_kind(other))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(InstanceLevel),
        other => Err(format!("instance level must be a string or list, got {}", value_kind(other))),
    }
}

/// Inverse of [`parse_instances`] up to normalization
pub fn instances_to_value(levels: &[InstanceLevel]) -> Value {
    if let [only] = levels {
        if only.0.len() > 1 && only.0.iter().all(|t| !t.contains('[')) {
            return only.to_value();
        }
    }
    Value::Sequence(levels.iter().map(InstanceLevel::to_value).collect())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

// =============================================================================
// TEMPLATE EXPANSION
// =============================================================================

/// `prefix[content]rest`
fn bracket_group(input: &str) -> IResult<&str, (&str, &str)> {
    pair(
        take_till(|c| c == '['),
        delimited(char('['), take_till(|c| c == ']'), char(']')),
    )(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

fn range(input: &str) -> IResult<&str, (i64, i64)> {
    all_consuming(separated_pair(
        delimited(space0, integer, space0),
        char(','),
        delimited(space0, integer, space0),
    ))(input)
}

/// Expand every bracket group in `template`, leftmost group varying slowest.
///
/// `Row[1,3]` gives `Row1 Row2 Row3`; `Seat[Front,'Back']` gives
/// `SeatFront SeatBack`. A template without brackets is returned as is.
pub fn expand_template(template: &str) -> Result<Vec<String>, ExpansionError> {
    let invalid = |reason: &str| ExpansionError::InvalidExpansionEntry {
        entry: template.to_string(),
        reason: reason.to_string(),
    };

    if !template.contains('[') {
        if template.contains(']') {
            return Err(invalid("unbalanced ']'"));
        }
        return Ok(vec![template.to_string()]);
    }

    let (rest, (prefix, content)) =
        bracket_group(template).map_err(|_| invalid("unterminated '['"))?;
    if prefix.contains(']') {
        return Err(invalid("unbalanced ']'"));
    }
    if content.contains('[') {
        return Err(invalid("nested brackets"));
    }

    let values = group_values(content).map_err(|reason| invalid(reason.as_str()))?;
    let tails = expand_template(rest).map_err(|e| match e {
        ExpansionError::InvalidExpansionEntry { reason, .. } => invalid(reason.as_str()),
        other => other,
    })?;

    let mut expanded = Vec::with_capacity(values.len() * tails.len());
    for value in &values {
        for tail in &tails {
            expanded.push(format!("{prefix}{value}{tail}"));
        }
    }
    Ok(expanded)
}

fn group_values(content: &str) -> Result<Vec<String>, String> {
    if let Ok((_, (start, end))) = range(content) {
        if start > end {
            return Err(format!("range start {start} is greater than end {end}"));
        }
        return Ok((start..=end).map(|i| i.to_string()).collect());
    }

    let mut values = Vec::new();
    for token in content.split(',') {
        let token = strip_quotes(token.trim());
        if token.is_empty() {
            return Err("empty list entry".to_string());
        }
        values.push(token.to_string());
    }
    Ok(values)
}

fn strip_quotes(token: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = token
            .strip_prefix(quote)
            .and_then(|t| t.strip_suffix(quote))
        {
            return inner;
        }
    }
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_expand_range() {
        assert_eq!(expand_template("Row[1,3]").unwrap(), vec!["Row1", "Row2", "Row3"]);
        assert_eq!(expand_template("[1, 2]").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_expand_literal_list() {
        assert_eq!(
            expand_template("Seat['Front', \"Back\",Middle]").unwrap(),
            vec!["SeatFront", "SeatBack", "SeatMiddle"]
        );
        assert_eq!(expand_template("Driver").unwrap(), vec!["Driver"]);
        assert_eq!(expand_template("[1,2,3]").unwrap(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_expand_multiple_groups() {
        assert_eq!(
            expand_template("abc[1,2]def['A','B']").unwrap(),
            vec!["abc1defA", "abc1defB", "abc2defA", "abc2defB"]
        );
    }

    #[test]
    fn test_invalid_entries() {
        for bad in ["Row[3,1]", "Row[1,2", "Row]1[", "Row[]", "Row[a,,b]", "Row[[1,2]]"] {
            assert!(
                matches!(
                    expand_template(bad),
                    Err(ExpansionError::InvalidExpansionEntry { ref entry, .. }) if entry == bad
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(
            parse_instances(&yaml("Row[1,2]")).unwrap(),
            vec![InstanceLevel(vec!["Row[1,2]".into()])]
        );
        assert_eq!(
            parse_instances(&yaml("[Left, Right]")).unwrap(),
            vec![InstanceLevel(vec!["Left".into(), "Right".into()])]
        );
        assert_eq!(
            parse_instances(&yaml("['Row[1,2]', [DriverSide, PassengerSide]]")).unwrap(),
            vec![
                InstanceLevel(vec!["Row[1,2]".into()]),
                InstanceLevel(vec!["DriverSide".into(), "PassengerSide".into()]),
            ]
        );
        assert_eq!(
            parse_instances(&yaml("[1, 2]")).unwrap(),
            vec![InstanceLevel(vec!["1".into(), "2".into()])]
        );
        assert!(parse_instances(&yaml("[]")).unwrap().is_empty());
        assert!(parse_instances(&yaml("{a: 1}")).is_err());
    }

    #[test]
    fn test_levels_round_trip() {
        for text in ["Row[1,2]", "[Left, Right]", "['Row[1,2]', [DriverSide, PassengerSide]]"] {
            let levels = parse_instances(&yaml(text)).unwrap();
            let again = parse_instances(&instances_to_value(&levels)).unwrap();
            assert_eq!(levels, again);
        }
    }

    #[test]
    fn test_level_names() {
        let level = InstanceLevel(vec!["Front".into(), "Row[1,2]".into()]);
        assert_eq!(level.names().unwrap(), vec!["Front", "Row1", "Row2"]);
    }

    #[test]
    fn test_empty_level_has_no_names() {
        let levels = parse_instances(&yaml("['Row[1,2]', []]")).unwrap();
        assert_eq!(levels.len(), 2);
        assert!(matches!(
            levels[1].names(),
            Err(ExpansionError::InvalidExpansionEntry { .. })
        ));
    }
}
