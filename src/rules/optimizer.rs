use anyhow::Result;
use serde_sarif::sarif::Result as SarifResult;

use crate::rules::{AnalysisContext, Rule, RuleMetadata, bytecode_location, result_message};

/// Reports every optimizer decision attributed to a bytecode offset.
///
/// Each result carries the annotation kind as its rule id.
pub(crate) struct OptimizerDecisionRule;

impl Rule for OptimizerDecisionRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "OPTIMIZER_DECISION",
            name: "Optimizer decisions",
            description: "JIT optimizer decisions attributed to bytecode offsets",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let mut results = Vec::new();
        for (_, report) in &context.batch.reports {
            for (member, offset, annotation) in report.annotations.iter() {
                results.push(
                    SarifResult::builder()
                        .rule_id(annotation.kind.as_str())
                        .message(result_message(annotation.text.clone()))
                        .locations(vec![bytecode_location(member, offset)])
                        .build(),
                );
            }
        }
        Ok(results)
    }
}
