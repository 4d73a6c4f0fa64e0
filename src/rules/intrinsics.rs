use std::collections::BTreeMap;

use anyhow::Result;
use jitlens::member::MemberKey;
use jitlens::signature;
use jitlens::tag::TagKind;
use serde_sarif::sarif::Result as SarifResult;

use crate::rules::{AnalysisContext, Rule, RuleMetadata, member_location, result_message};

/// Rule that lists the intrinsics each compiled member ended up using, inlined callees included.
pub(crate) struct IntrinsicUsageRule;

impl Rule for IntrinsicUsageRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "INTRINSIC_USAGE",
            name: "Intrinsic usage",
            description: "Intrinsics substituted anywhere in a member's compilations",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let mut found: BTreeMap<(MemberKey, String), Option<MemberKey>> = BTreeMap::new();
        for (member, compilation) in context.history.all_compilations() {
            let document = &compilation.task;
            let tree = &document.tree;
            if tree.is_empty() {
                continue;
            }
            let mut call = None;
            for id in tree.descendants(tree.root()) {
                let tag = tree.get(id);
                match tag.kind {
                    TagKind::Bc => call = None,
                    TagKind::Call => call = tag.attribute("method"),
                    TagKind::Intrinsic => {
                        let Some(intrinsic) = tag.attribute("id") else {
                            continue;
                        };
                        let callee = call
                            .and_then(|method_id| signature::from_dictionary(document, method_id))
                            .map(|resolved| resolved.key());
                        found
                            .entry((member.clone(), intrinsic.to_string()))
                            .or_insert(callee);
                    }
                    _ => {}
                }
            }
        }

        let results = found
            .into_iter()
            .map(|((member, intrinsic), callee)| {
                let text = match callee {
                    Some(callee) => format!("Intrinsic {intrinsic} used for {callee}"),
                    None => format!("Intrinsic {intrinsic} used"),
                };
                SarifResult::builder()
                    .rule_id(self.metadata().id)
                    .message(result_message(text))
                    .locations(vec![member_location(&member)])
                    .build()
            })
            .collect();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitlens::compilations::CompilationHistory;
    use jitlens::engine::BatchReport;

    const LOG: &str = "\
<task compile_id='3' method='com/example/Foo hash (Ljava/lang/Object;)I'>
<type id='721' name='int'/>
<klass id='729' name='com/example/Foo' flags='1'/>
<klass id='730' name='java/lang/Object' flags='1'/>
<method id='820' holder='729' name='hash' return='721' arguments='730'/>
<parse method='820'>
<bc code='182' bci='1'/>
<method id='821' holder='730' name='hashCode' return='721' flags='257'/>
<call method='821' count='5000' prof_factor='1' inline='1'/>
<intrinsic id='_hashCode' nodes='20'/>
<bc code='184' bci='5'/>
<intrinsic id='_hashCode' nodes='20'/>
<bc code='184' bci='9'/>
<intrinsic id='_currentTimeMillis' nodes='4'/>
</parse>
</task>
";

    #[test]
    fn intrinsic_rule_reports_distinct_intrinsics_per_member() {
        let mut history = CompilationHistory::new();
        history.ingest_log(LOG).expect("ingest log");
        let batch = BatchReport::default();
        let context = AnalysisContext {
            history: &history,
            batch: &batch,
        };

        let results = IntrinsicUsageRule.run(&context).expect("intrinsic rule run");

        assert_eq!(2, results.len());
        let messages: Vec<&str> = results
            .iter()
            .map(|result| result.message.text.as_deref().unwrap_or(""))
            .collect();
        assert_eq!(
            vec![
                "Intrinsic _currentTimeMillis used",
                "Intrinsic _hashCode used for java.lang.Object.hashCode()",
            ],
            messages
        );
        assert_eq!(Some("INTRINSIC_USAGE"), results[0].rule_id.as_deref());
    }
}
