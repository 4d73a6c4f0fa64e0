use anyhow::Result;
use jitlens::compilations::CompilationHistory;
use jitlens::engine::BatchReport;
use jitlens::member::MemberKey;
use serde_sarif::sarif::{
    Location, LogicalLocation, Message, MultiformatMessageString, ReportingDescriptor,
    Result as SarifResult,
};

pub(crate) mod intrinsics;
pub(crate) mod optimizer;

/// Inputs shared by every rule of one run.
pub(crate) struct AnalysisContext<'a> {
    pub(crate) history: &'a CompilationHistory,
    pub(crate) batch: &'a BatchReport,
}

/// Metadata describing a report rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// Rule interface for turning analysis output into SARIF results.
pub(crate) trait Rule {
    fn metadata(&self) -> RuleMetadata;
    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>>;
}

pub(crate) fn all_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(optimizer::OptimizerDecisionRule),
        Box::new(intrinsics::IntrinsicUsageRule),
    ]
}

/// SARIF descriptors for every rule, in run order.
pub(crate) fn rule_descriptors() -> Vec<ReportingDescriptor> {
    all_rules()
        .iter()
        .map(|rule| {
            let metadata = rule.metadata();
            ReportingDescriptor::builder()
                .id(metadata.id)
                .name(metadata.name)
                .short_description(
                    MultiformatMessageString::builder()
                        .text(metadata.description)
                        .build(),
                )
                .build()
        })
        .collect()
}

/// Runs every rule in order and concatenates their results.
pub(crate) fn run_rules(context: &AnalysisContext) -> Result<Vec<SarifResult>> {
    let mut results = Vec::new();
    for rule in all_rules() {
        let metadata = rule.metadata();
        let found = rule.run(context)?;
        tracing::debug!(rule = metadata.id, results = found.len(), "rule finished");
        results.extend(found);
    }
    Ok(results)
}

/// Location of a bytecode offset inside a member, named `Class.member(params)@bci`.
pub(crate) fn bytecode_location(member: &MemberKey, offset: u32) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!("{member}@{offset}"))
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn member_location(member: &MemberKey) -> Location {
    let logical = LogicalLocation::builder()
        .name(member.to_string())
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
