use crate::{ExpressionEvaluator, Placement, Trigger, TriggerRule};

/// Find the first rule of `trigger` that matches `placement`.
///
/// Rules are evaluated strictly in list order and evaluation stops at the first match, so later
/// rules are never consulted once an earlier one matched. A rule whose evaluation fails is logged
/// and treated as a non-match. Returns `None` when no rule matches, including for a trigger
/// without rules.
pub async fn find_matching_rule<'a>(
    placement: &Placement,
    trigger: &'a Trigger,
    evaluator: &impl ExpressionEvaluator,
) -> Option<&'a TriggerRule> {
    for (index, rule) in trigger.rules.iter().enumerate() {
        match evaluator.evaluate(rule, placement).await {
            Ok(true) => {
                log::trace!(target: "paywall",
                            placement_name = placement.name(),
                            experiment_id = rule.experiment_id.as_str(),
                            rule_index = index;
                            "rule matched");
                return Some(rule);
            }
            Ok(false) => {}
            Err(err) => {
                log::warn!(target: "paywall",
                           placement_name = placement.name(),
                           experiment_id = rule.experiment_id.as_str(),
                           rule_index = index;
                           "failed to evaluate rule, treating it as no match: {}", err);
            }
        }
    }

    None
}
