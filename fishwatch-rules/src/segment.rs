use fishwatch_model::fact::FactType;
use fishwatch_model::field::FieldType;
use fishwatch_model::rule::{ConditionSegment, LogicOperator, RuleDefinition};

use crate::error::CompileError;
use crate::expression::{parse_number, quote, MAX_NESTING};

/// Fact type custom rules are evaluated against.
pub const CUSTOM_RULE_FACT: FactType = FactType::Movement;

/// Translates the ordered condition segments of a custom rule into an
/// expression, e.g. `flagState == "SWE" && areaCode == "DNK"`.
///
/// Grouping markers must be balanced and may not nest deeper than
/// [`MAX_NESTING`]; a rule breaking either is rejected here rather than at
/// evaluation time.
pub fn to_expression(rule: &RuleDefinition) -> Result<String, CompileError> {
    let segments = rule.sorted_segments();
    if segments.is_empty() {
        return Err(CompileError::definition(&rule.name, "rule has no condition segments"));
    }

    let mut depth: i64 = 0;
    let mut expression = String::new();
    let last = segments.len() - 1;

    for (position, segment) in segments.iter().enumerate() {
        let opening = grouping(&rule.name, &segment.start_operator, '(')?;
        let closing = grouping(&rule.name, &segment.end_operator, ')')?;

        depth += opening as i64;
        if depth > MAX_NESTING as i64 {
            return Err(CompileError::Grouping {
                rule: rule.name.clone(),
                message: format!(
                    "segment {} nests groups deeper than {} levels",
                    segment.order, MAX_NESTING
                ),
            });
        }
        expression.push_str(&"(".repeat(opening));
        expression.push_str(&comparison(rule, segment)?);
        depth -= closing as i64;
        if depth < 0 {
            return Err(CompileError::Grouping {
                rule: rule.name.clone(),
                message: format!("segment {} closes a group that was never opened", segment.order),
            });
        }
        expression.push_str(&")".repeat(closing));

        if position < last {
            match segment.logic_operator {
                LogicOperator::And => expression.push_str(" && "),
                LogicOperator::Or => expression.push_str(" || "),
                LogicOperator::None => {
                    return Err(CompileError::definition(
                        &rule.name,
                        format!("segment {} is not joined to the next one", segment.order),
                    ))
                }
            }
        }
    }

    if depth != 0 {
        return Err(CompileError::Grouping {
            rule: rule.name.clone(),
            message: format!("{} group(s) left open", depth),
        });
    }

    Ok(expression)
}

fn grouping(rule: &str, marker: &str, expected: char) -> Result<usize, CompileError> {
    let marker = marker.trim();
    if marker.chars().all(|c| c == expected) {
        Ok(marker.len())
    } else {
        Err(CompileError::Grouping {
            rule: rule.to_string(),
            message: format!("invalid grouping marker `{}`", marker),
        })
    }
}

fn comparison(rule: &RuleDefinition, segment: &ConditionSegment) -> Result<String, CompileError> {
    if segment.criteria != segment.sub_criteria.criteria() {
        return Err(CompileError::definition(
            &rule.name,
            format!(
                "segment {}: {:?} does not belong to {:?}",
                segment.order, segment.sub_criteria, segment.criteria
            ),
        ));
    }
    let field = CUSTOM_RULE_FACT
        .field_for(segment.sub_criteria)
        .ok_or_else(|| CompileError::UnknownField {
            rule: rule.name.clone(),
            fact_type: CUSTOM_RULE_FACT.to_string(),
            field: format!("{:?}", segment.sub_criteria),
        })?;

    let value = match field.ty.element() {
        FieldType::Number => {
            let raw = segment.value.trim();
            parse_number(raw).ok_or_else(|| {
                CompileError::type_error(
                    &rule.name,
                    format!("`{}` is not a number for {}", raw, field.name),
                )
            })?;
            raw.to_string()
        }
        FieldType::Bool => match segment.value.trim().to_ascii_lowercase().as_str() {
            "true" => "true".to_string(),
            "false" => "false".to_string(),
            other => {
                return Err(CompileError::type_error(
                    &rule.name,
                    format!("`{}` is not a boolean for {}", other, field.name),
                ))
            }
        },
        _ => quote(&segment.value),
    };

    Ok(format!("{} {} {}", field.name, segment.condition.symbol(), value))
}

#[cfg(test)]
mod tests {
    use fishwatch_model::field::{Criteria, SubCriteria};
    use fishwatch_model::rule::{Availability, ConditionOperator};

    use super::*;

    fn segment(
        order: u32,
        start: &str,
        sub: SubCriteria,
        op: ConditionOperator,
        value: &str,
        end: &str,
        logic: LogicOperator,
    ) -> ConditionSegment {
        ConditionSegment {
            start_operator: start.into(),
            criteria: sub.criteria(),
            sub_criteria: sub,
            condition: op,
            value: value.into(),
            end_operator: end.into(),
            logic_operator: logic,
            order,
        }
    }

    fn rule(segments: Vec<ConditionSegment>) -> RuleDefinition {
        RuleDefinition {
            guid: "guid-1".into(),
            name: "test".into(),
            description: None,
            availability: Availability::Global,
            organisation: None,
            active: true,
            archived: false,
            aggregate_invocations: false,
            segments,
            actions: vec![],
            intervals: vec![],
            subscriptions: vec![],
            last_triggered: None,
            updated: None,
            updated_by: None,
        }
    }

    #[test]
    fn joins_segments_in_order() {
        let expression = to_expression(&rule(vec![
            segment(1, "", SubCriteria::AreaCode, ConditionOperator::Eq, "DNK", "", LogicOperator::None),
            segment(0, "", SubCriteria::FlagState, ConditionOperator::Eq, "SWE", "", LogicOperator::And),
        ]))
        .expect("translates");
        assert_eq!(expression, r#"flagState == "SWE" && areaCode == "DNK""#);
    }

    #[test]
    fn keeps_grouping_and_numeric_values() {
        let expression = to_expression(&rule(vec![
            segment(0, "(", SubCriteria::ReportedSpeed, ConditionOperator::Gt, "10", "", LogicOperator::Or),
            segment(1, "", SubCriteria::FlagState, ConditionOperator::Ne, "SWE", ")", LogicOperator::And),
            segment(2, "", SubCriteria::AssetGroup, ConditionOperator::Eq, "Demersal", "", LogicOperator::None),
        ]))
        .expect("translates");
        assert_eq!(
            expression,
            r#"(reportedSpeed > 10 || flagState != "SWE") && assetGroup == "Demersal""#
        );
        assert_eq!(Criteria::AssetGroup, SubCriteria::AssetGroup.criteria());
    }

    #[test]
    fn rejects_unbalanced_grouping() {
        let open = rule(vec![segment(
            0, "((", SubCriteria::FlagState, ConditionOperator::Eq, "SWE", ")", LogicOperator::None,
        )]);
        assert!(matches!(to_expression(&open), Err(CompileError::Grouping { .. })));

        let close = rule(vec![segment(
            0, "", SubCriteria::FlagState, ConditionOperator::Eq, "SWE", ")", LogicOperator::None,
        )]);
        assert!(matches!(to_expression(&close), Err(CompileError::Grouping { .. })));
    }

    #[test]
    fn rejects_non_numeric_values_for_numeric_fields() {
        let bad = rule(vec![segment(
            0, "", SubCriteria::Latitude, ConditionOperator::Gt, "north", "", LogicOperator::None,
        )]);
        assert!(matches!(to_expression(&bad), Err(CompileError::Type { .. })));

        for raw in ["1e5", "NaN", "inf", "+3"] {
            let odd = rule(vec![segment(
                0, "", SubCriteria::ReportedSpeed, ConditionOperator::Gt, raw, "", LogicOperator::None,
            )]);
            assert!(
                matches!(to_expression(&odd), Err(CompileError::Type { .. })),
                "{} accepted",
                raw
            );
        }
    }

    #[test]
    fn rejects_sub_criteria_outside_their_criteria() {
        let mut mismatched = segment(
            0, "", SubCriteria::FlagState, ConditionOperator::Eq, "SWE", "", LogicOperator::None,
        );
        mismatched.criteria = Criteria::Area;
        assert!(matches!(
            to_expression(&rule(vec![mismatched])),
            Err(CompileError::Definition { .. })
        ));
    }

    #[test]
    fn rejects_groups_nested_too_deep() {
        let deep = rule(vec![segment(
            0,
            &"(".repeat(2000),
            SubCriteria::FlagState,
            ConditionOperator::Eq,
            "SWE",
            &")".repeat(2000),
            LogicOperator::None,
        )]);
        assert!(matches!(to_expression(&deep), Err(CompileError::Grouping { .. })));
    }

    #[test]
    fn long_and_chains_translate() {
        let segments = (0..5000)
            .map(|order| {
                segment(
                    order,
                    "",
                    SubCriteria::FlagState,
                    ConditionOperator::Ne,
                    "XXX",
                    "",
                    if order == 4999 { LogicOperator::None } else { LogicOperator::And },
                )
            })
            .collect();
        let expression = to_expression(&rule(segments)).expect("translates");
        assert_eq!(expression.matches(" && ").count(), 4999);
    }
}
