//! Attribution of optimizer decisions in one compilation to bytecode offsets.
//!
//! The engine walks the root `parse` of a compilation task in document order, tracking
//! the offset announced by the most recent `bc` record, and then searches the whole task
//! for escape-analysis eliminations.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::annotations::{AnnotationKind, AnnotationSet, LineAnnotation, Reference};
use crate::error::AnnotationError;
use crate::ir::{BytecodeInstruction, MemberBytecode};
use crate::member::{MemberKey, MemberRepository};
use crate::opcodes::Opcode;
use crate::signature::{self, log_type_name};
use crate::tag::{Tag, TagId, TagKind};
use crate::tag_processor::Document;

/// Knobs for [`AnnotationEngine`].
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Reject log records that disagree with the instruction at their offset.
    pub sanity_checks: bool,
    /// Also attribute eliminated allocations and locks to inlined callees.
    pub annotate_inlined_callees: bool,
    /// VM release used when phase names do not reveal the log shape.
    pub vm_version: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sanity_checks: true,
            annotate_inlined_callees: false,
            vm_version: None,
        }
    }
}

/// Generation of the log format a task was written in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogShape {
    /// Before JDK 9: eliminations under the `optimizer` phase.
    Legacy,
    /// JDK 9 and later: `escapeAnalysis` and `parse_hir` phases.
    Modern,
    #[default]
    Unknown,
}

/// Result of annotating one compilation of one member.
#[derive(Debug, Default, Serialize)]
pub struct AnnotationReport {
    pub annotations: AnnotationSet,
    pub unhandled_tags: BTreeSet<String>,
    pub anomalies: Vec<String>,
    pub shape: LogShape,
}

/// Results of [`AnnotationEngine::annotate_all`].
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<(MemberKey, AnnotationReport)>,
    pub failures: Vec<(MemberKey, AnnotationError)>,
}

impl BatchReport {
    /// Every successful member's annotations in one set.
    pub fn annotations(&self) -> AnnotationSet {
        let mut merged = AnnotationSet::default();
        for (_, report) in &self.reports {
            merged.merge(report.annotations.clone());
        }
        merged
    }

    pub fn unhandled_tags(&self) -> BTreeSet<String> {
        self.reports
            .iter()
            .flat_map(|(_, report)| report.unhandled_tags.iter().cloned())
            .collect()
    }
}

/// True when the instruction can carry an inlining or intrinsic decision.
pub fn sanity_check_inline(instruction: Option<&BytecodeInstruction>) -> bool {
    instruction.is_some_and(|instruction| instruction.opcode.is_invoke())
}

/// True when the instruction can carry a branch profile.
pub fn sanity_check_branch(instruction: Option<&BytecodeInstruction>) -> bool {
    instruction.is_some_and(|instruction| instruction.opcode.is_conditional_branch())
}

/// Major Java release of a version string such as `1.8.0_40`, `9-ea` or `17.0.2`.
pub fn java_major_version(version: &str) -> Option<u32> {
    let mut numbers = version
        .trim()
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty());
    let first: u32 = numbers.next()?.parse().ok()?;
    if first == 1 {
        numbers.next()?.parse().ok()
    } else {
        Some(first)
    }
}

/// Detects the log shape from phase names, falling back to the VM version.
pub fn detect_shape(document: &Document, vm_version: Option<&str>) -> LogShape {
    let tree = &document.tree;
    let tags = if tree.is_empty() {
        Vec::new()
    } else {
        tree.descendants(tree.root())
    };
    for id in tags {
        let tag = tree.get(id);
        if tag.kind != TagKind::Phase {
            continue;
        }
        match tag.attribute("name") {
            Some("optimizer") => return LogShape::Legacy,
            Some("escapeAnalysis") | Some("parse_hir") => return LogShape::Modern,
            _ => {}
        }
    }
    match vm_version.and_then(java_major_version) {
        Some(major) if major >= 9 => LogShape::Modern,
        Some(_) => LogShape::Legacy,
        None => LogShape::Unknown,
    }
}

pub struct AnnotationEngine<'r, R: ?Sized> {
    repository: &'r R,
    options: EngineOptions,
}

impl<'r, R: MemberRepository + ?Sized> AnnotationEngine<'r, R> {
    pub fn new(repository: &'r R, options: EngineOptions) -> Self {
        Self {
            repository,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Annotates compilation `index` of `member`.
    ///
    /// A member that was never compiled, or has no compilation at `index`, yields an
    /// empty report.
    pub fn annotate(
        &self,
        member: &MemberKey,
        index: usize,
    ) -> Result<AnnotationReport, AnnotationError> {
        let mut report = AnnotationReport::default();
        if !self.repository.is_compiled(member) {
            debug!(member = %member, "member was not compiled");
            return Ok(report);
        }
        let Some(compilation) = self.repository.compilation(member, index) else {
            debug!(member = %member, index, "no compilation at index");
            return Ok(report);
        };
        let document = &compilation.task;
        let bytecode = self.repository.bytecode(member);
        if bytecode.is_none() && self.options.sanity_checks {
            warn!(member = %member, "no bytecode for member, sanity checks skipped");
        }
        report.shape = detect_shape(document, self.options.vm_version.as_deref());

        let mut walker = Walker {
            options: &self.options,
            repository: self.repository,
            member,
            document,
            bytecode,
            report: &mut report,
        };
        for parse in root_parses(member, document) {
            walker.walk(parse, &mut WalkState::default())?;
        }
        walker.eliminations()?;
        debug!(
            member = %member,
            annotations = report.annotations.len(),
            "annotated compilation"
        );
        Ok(report)
    }

    /// Annotates compilation `index` of every compiled member; failures do not stop the batch.
    pub fn annotate_all(&self, index: usize) -> BatchReport {
        let mut batch = BatchReport::default();
        for member in self.repository.compiled_members() {
            match self.annotate(&member, index) {
                Ok(report) => batch.reports.push((member, report)),
                Err(err) => {
                    warn!(member = %member, error = %err, "annotation failed");
                    batch.failures.push((member, err));
                }
            }
        }
        batch
    }
}

/// `parse` tags not nested in another `parse` whose method is `member`.
fn root_parses(member: &MemberKey, document: &Document) -> Vec<TagId> {
    let tree = &document.tree;
    let mut roots = Vec::new();
    for parse in tree.outermost_of_kind(tree.root(), TagKind::Parse) {
        let Some(method_id) = tree.get(parse).attribute("method") else {
            warn!(member = %member, "parse without method attribute skipped");
            continue;
        };
        if signature::matches(member, document, method_id) {
            roots.push(parse);
            continue;
        }
        let late_inline = tree.siblings(parse).into_iter().any(|sibling| {
            let sibling = tree.get(sibling);
            sibling.kind == TagKind::LateInline && sibling.attribute("method") == Some(method_id)
        });
        if late_inline {
            debug!(member = %member, method_id, "late inlined parse skipped");
        } else {
            warn!(member = %member, method_id, "parse does not match member, skipped");
        }
    }
    roots
}

/// Position of the walk inside one parse.
#[derive(Default)]
struct WalkState {
    bci: Option<u32>,
    call: Option<TagId>,
    methods: HashMap<String, TagId>,
    last_method: Option<String>,
}

struct Walker<'a, R: ?Sized> {
    options: &'a EngineOptions,
    repository: &'a R,
    member: &'a MemberKey,
    document: &'a Document,
    bytecode: Option<&'a MemberBytecode>,
    report: &'a mut AnnotationReport,
}

impl<'a, R: MemberRepository + ?Sized> Walker<'a, R> {
    fn walk(&mut self, parent: TagId, state: &mut WalkState) -> Result<(), AnnotationError> {
        let document = self.document;
        let tree = &document.tree;
        for (id, tag) in tree.children(parent) {
            match tag.kind {
                TagKind::Bc => {
                    state.bci = tag.numeric_attribute("bci")?;
                    state.call = None;
                }
                TagKind::Method => {
                    if let Some(method_id) = tag.attribute("id") {
                        state.methods.insert(method_id.to_string(), id);
                        state.last_method = Some(method_id.to_string());
                    }
                }
                TagKind::Call => state.call = Some(id),
                TagKind::InlineSuccess | TagKind::InlineFail => self.inline(tag, state)?,
                TagKind::Branch => self.branch(tag, state)?,
                TagKind::Intrinsic => self.intrinsic(tag, state)?,
                TagKind::VirtualCall => self.virtual_call(tag, state),
                TagKind::UncommonTrap => self.uncommon_trap(tag, state)?,
                TagKind::HotThrow => self.hot_throw(tag, state),
                TagKind::Phase if tag.attribute("name") == Some("parse_hir") => {
                    self.walk(id, state)?
                }
                TagKind::Phase
                | TagKind::PhaseDone
                | TagKind::Parse
                | TagKind::ParseDone
                | TagKind::Klass
                | TagKind::Type
                | TagKind::DirectCall
                | TagKind::PredictedCall
                | TagKind::Dependency
                | TagKind::AssertNull
                | TagKind::Observe
                | TagKind::CastUp
                | TagKind::InlineLevelDiscount
                | TagKind::LateInline
                | TagKind::InlineId
                | TagKind::ReplaceStringConcat
                | TagKind::EliminateAllocation
                | TagKind::EliminateLock
                | TagKind::Jvms => {}
                TagKind::Task | TagKind::Nmethod | TagKind::VmVersion | TagKind::Other => {
                    debug!(tag = %tag.name, "unhandled tag in parse");
                    self.report.unhandled_tags.insert(tag.name.clone());
                }
            }
        }
        Ok(())
    }

    /// Offset of a record that must follow a `bc`. Records an anomaly when there is none.
    fn bc_offset(&mut self, tag: &Tag, state: &WalkState) -> Option<u32> {
        if state.bci.is_none() {
            warn!(member = %self.member, tag = %tag.name, "record before any bc");
            self.report
                .anomalies
                .push(format!("<{}> before any <bc> in {}", tag.name, self.member));
        }
        state.bci
    }

    fn check(
        &self,
        offset: u32,
        kind: AnnotationKind,
        passes: fn(Option<&BytecodeInstruction>) -> bool,
    ) -> Result<(), AnnotationError> {
        if !self.options.sanity_checks {
            return Ok(());
        }
        let Some(bytecode) = self.bytecode else {
            return Ok(());
        };
        let instruction = bytecode.instruction_at(offset);
        if passes(instruction) {
            return Ok(());
        }
        Err(AnnotationError::SanityCheck {
            offset,
            instruction: instruction.map_or_else(|| "<none>".to_string(), ToString::to_string),
            kind: kind.to_string(),
        })
    }

    fn emit(&mut self, member: &MemberKey, offset: u32, annotation: LineAnnotation) {
        self.report.annotations.add(member, offset, annotation);
    }

    /// Callee of the current call site, or the most recently declared method.
    fn callee(&self, tag: &Tag, state: &WalkState) -> Option<String> {
        let tree = &self.document.tree;
        tag.attribute("method")
            .or_else(|| state.call.and_then(|call| tree.get(call).attribute("method")))
            .or(state.last_method.as_deref())
            .map(str::to_string)
    }

    fn callee_reference(&self, method_id: Option<&str>) -> Reference {
        let Some(method_id) = method_id else {
            return Reference::None;
        };
        match signature::from_dictionary(self.document, method_id) {
            Some(resolved) => Reference::Member(resolved.key()),
            None => {
                debug!(method_id, "callee not resolvable through dictionary");
                Reference::None
            }
        }
    }

    fn inline(&mut self, tag: &Tag, state: &WalkState) -> Result<(), AnnotationError> {
        let kind = if tag.kind == TagKind::InlineSuccess {
            AnnotationKind::InlineSuccess
        } else {
            AnnotationKind::InlineFail
        };
        let Some(offset) = self.bc_offset(tag, state) else {
            return Ok(());
        };
        self.check(offset, kind, sanity_check_inline)?;

        let document = self.document;
        let tree = &document.tree;
        let callee_id = state
            .call
            .and_then(|call| tree.get(call).attribute("method"))
            .or(state.last_method.as_deref());
        let reference = self.callee_reference(callee_id);

        let mut lines = vec![format!(
            "Inlined: {}",
            if kind == AnnotationKind::InlineSuccess { "Yes" } else { "No" }
        )];
        if let Some(reason) = tag.attribute("reason") {
            lines.push(format!("Reason: {reason}"));
        }
        if let Reference::Member(callee) = &reference {
            lines.push(format!("Callee: {callee}"));
        }
        if let Some(call) = state.call.map(|call| tree.get(call)) {
            push_attribute(&mut lines, call, "count", "Count");
            push_attribute(&mut lines, call, "prof_factor", "Prof factor");
        }
        if let Some(method) = callee_id.and_then(|id| state.methods.get(id)) {
            let method = tree.get(*method);
            if let Some(bytes) = method.attribute("bytes") {
                lines.push(format!("Size: {bytes} bytes"));
            }
            push_attribute(&mut lines, method, "iicount", "Invocations");
        }

        let member = self.member;
        self.emit(member, offset, LineAnnotation::new(kind, lines.join("\n"), reference));
        Ok(())
    }

    fn branch(&mut self, tag: &Tag, state: &WalkState) -> Result<(), AnnotationError> {
        let Some(offset) = self.bc_offset(tag, state) else {
            return Ok(());
        };
        self.check(offset, AnnotationKind::Branch, sanity_check_branch)?;

        let mut lines = Vec::new();
        push_attribute(&mut lines, tag, "cnt", "Count");
        push_attribute(&mut lines, tag, "taken", "Branch taken");
        push_attribute(&mut lines, tag, "not_taken", "Branch not taken");
        push_attribute(&mut lines, tag, "prob", "Taken probability");
        if lines.is_empty() {
            lines.push("Branch".to_string());
        }

        let member = self.member;
        self.emit(
            member,
            offset,
            LineAnnotation::new(AnnotationKind::Branch, lines.join("\n"), Reference::None),
        );
        Ok(())
    }

    fn intrinsic(&mut self, tag: &Tag, state: &WalkState) -> Result<(), AnnotationError> {
        let Some(offset) = self.bc_offset(tag, state) else {
            return Ok(());
        };
        self.check(offset, AnnotationKind::IntrinsicUsed, sanity_check_inline)?;

        let (text, reference) = match tag.attribute("id") {
            Some(id) => (format!("Intrinsic: {id}"), Reference::Label(id.to_string())),
            None => ("Intrinsic".to_string(), Reference::None),
        };
        let member = self.member;
        self.emit(
            member,
            offset,
            LineAnnotation::new(AnnotationKind::IntrinsicUsed, text, reference),
        );
        Ok(())
    }

    fn virtual_call(&mut self, tag: &Tag, state: &WalkState) {
        let Some(offset) = state.bci else {
            debug!(tag = %tag.name, "virtual call before any bc skipped");
            return;
        };
        let callee = self.callee(tag, state);
        let reference = self.callee_reference(callee.as_deref());
        let text = match &reference {
            Reference::Member(callee) => format!("Virtual call to {callee}"),
            _ => "Virtual call".to_string(),
        };
        let member = self.member;
        self.emit(
            member,
            offset,
            LineAnnotation::new(AnnotationKind::VirtualCall, text, reference),
        );
    }

    fn uncommon_trap(&mut self, tag: &Tag, state: &WalkState) -> Result<(), AnnotationError> {
        if let Some(method_id) = tag.attribute("method") {
            if !signature::matches(self.member, self.document, method_id) {
                debug!(method_id, "uncommon trap of another method skipped");
                return Ok(());
            }
        }
        let trap_bci = match tag.signed_attribute("bci")? {
            Some(bci) => match u32::try_from(bci) {
                Ok(bci) => Some(bci),
                Err(_) => {
                    debug!(bci, "uncommon trap at method entry skipped");
                    return Ok(());
                }
            },
            None => None,
        };
        let Some(offset) = trap_bci.or(state.bci) else {
            debug!(tag = %tag.name, "uncommon trap without offset skipped");
            return Ok(());
        };

        let mut lines = vec!["Uncommon trap".to_string()];
        push_attribute(&mut lines, tag, "reason", "Reason");
        push_attribute(&mut lines, tag, "action", "Action");
        push_attribute(&mut lines, tag, "comment", "Comment");

        let member = self.member;
        self.emit(
            member,
            offset,
            LineAnnotation::new(AnnotationKind::UncommonTrap, lines.join("\n"), Reference::None),
        );
        Ok(())
    }

    /// Annotated at the handler that catches the hot exception.
    fn hot_throw(&mut self, tag: &Tag, state: &WalkState) {
        let Some(offset) = state.bci else {
            debug!(tag = %tag.name, "hot throw before any bc skipped");
            return;
        };
        let Some(handler) = self
            .bytecode
            .and_then(|bytecode| bytecode.exception_table.entry_covering(offset))
        else {
            debug!(member = %self.member, offset, "no exception handler covers hot throw");
            return;
        };

        let preallocated = tag.attribute("preallocated") == Some("1");
        let kind = if preallocated {
            AnnotationKind::HotThrowPreallocated
        } else {
            AnnotationKind::HotThrowNotPreallocated
        };
        let mut lines = vec![format!(
            "Hot throw at bci {offset} ({})",
            if preallocated { "preallocated" } else { "not preallocated" }
        )];
        push_attribute(&mut lines, tag, "reason", "Reason");
        let reference = match handler.exception_type.strip_prefix("Class ") {
            Some(class) => Reference::Class(log_type_name(class.trim())),
            None => Reference::None,
        };

        let member = self.member;
        let target = handler.target;
        self.emit(member, target, LineAnnotation::new(kind, lines.join("\n"), reference));
    }

    /// Eliminated allocations and locks anywhere in the task.
    fn eliminations(&mut self) -> Result<(), AnnotationError> {
        let document = self.document;
        let tree = &document.tree;
        for id in tree.descendants(tree.root()) {
            let tag = tree.get(id);
            let kind = match tag.kind {
                TagKind::EliminateAllocation => AnnotationKind::EliminatedAllocation,
                TagKind::EliminateLock if tag.attribute("kind") == Some("coarsened") => {
                    AnnotationKind::LockCoarsen
                }
                TagKind::EliminateLock => AnnotationKind::LockElision,
                _ => continue,
            };
            let allocated = (kind == AnnotationKind::EliminatedAllocation)
                .then(|| self.allocation_type(tag));

            for (_, jvms) in tree.children(id) {
                if jvms.kind != TagKind::Jvms {
                    continue;
                }
                let (Some(method_id), Some(bci)) =
                    (jvms.attribute("method"), jvms.signed_attribute("bci")?)
                else {
                    continue;
                };
                let Ok(bci) = u32::try_from(bci) else {
                    debug!(method_id, bci, "method entry jvms skipped");
                    continue;
                };
                let Some(target) = self.elimination_target(method_id, jvms) else {
                    continue;
                };

                let repository = self.repository;
                let via_inlining = document
                    .dictionary
                    .opcode_at(method_id, bci, || {
                        repository
                            .bytecode(&target)
                            .map(|bytecode| bytecode.instructions.as_slice())
                    })
                    .is_some_and(Opcode::is_invoke);

                let annotation = match &allocated {
                    Some(type_name) => LineAnnotation::new(
                        kind,
                        if via_inlining {
                            format!("Allocation of {type_name} eliminated due to inlining")
                        } else {
                            format!("Allocation of {type_name} eliminated: does not escape")
                        },
                        Reference::Class(type_name.clone()),
                    ),
                    None => LineAnnotation::new(
                        kind,
                        lock_text(kind, via_inlining),
                        Reference::None,
                    ),
                };
                self.emit(&target, bci, annotation);
            }
        }
        Ok(())
    }

    fn elimination_target(&mut self, method_id: &str, jvms: &Tag) -> Option<MemberKey> {
        if signature::matches(self.member, self.document, method_id) {
            return Some(self.member.clone());
        }
        if !self.options.annotate_inlined_callees {
            return None;
        }
        match signature::from_dictionary(self.document, method_id) {
            Some(resolved) => Some(resolved.key()),
            None => {
                debug!(method_id, "elimination site not resolvable through dictionary");
                self.report.unhandled_tags.insert(jvms.name.clone());
                None
            }
        }
    }

    /// Allocated type through the dictionary, or the raw attribute when it is not an ID.
    fn allocation_type(&self, tag: &Tag) -> String {
        let Some(raw) = tag.attribute("type") else {
            return "unknown type".to_string();
        };
        self.document
            .dictionary
            .type_or_klass(raw)
            .and_then(|declared| self.document.tree.get(declared).attribute("name"))
            .map_or_else(|| raw.to_string(), log_type_name)
    }
}

fn lock_text(kind: AnnotationKind, via_inlining: bool) -> String {
    match (kind, via_inlining) {
        (AnnotationKind::LockCoarsen, true) => "Lock coarsened after inlining".to_string(),
        (AnnotationKind::LockCoarsen, false) => "Lock coarsened".to_string(),
        (_, true) => "Lock eliminated due to inlining".to_string(),
        (_, false) => "Lock eliminated: not contended".to_string(),
    }
}

fn push_attribute(lines: &mut Vec<String>, tag: &Tag, attribute: &str, label: &str) {
    if let Some(value) = tag.attribute(attribute) {
        lines.push(format!("{label}: {value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilations::CompilationHistory;
    use crate::disassembly::decode_class;

    const LISTING: &str = "\
public class com.example.Foo {
  public void run();
    Code:
       0: aload_0
       1: iconst_0
       2: istore_1
       3: iload_1
       4: bipush        10
       6: if_icmpge     20
       9: aload_0
      10: invokevirtual #2                  // Method helper:()I
      13: pop
      14: iinc          1, 1
      17: goto          3
      20: return

  public int process(int);
    Code:
       0: aload_0
       1: iload_1
       2: invokevirtual #3                  // Method check:(I)I
       5: ireturn
       6: astore_2
       7: iconst_m1
       8: ireturn
    Exception table:
       from    to  target type
           0     5     6   Class java/lang/RuntimeException

  private int helper();
    Code:
       0: aload_0
       1: invokevirtual #4                  // Method size:()I
       4: ireturn
}
";

    const DECLARATIONS: &str = "\
<type id='680' name='void'/>
<type id='721' name='int'/>
<klass id='729' name='com/example/Foo' flags='1'/>
<method id='818' holder='729' name='run' return='680' flags='1' bytes='21' iicount='10000'/>";

    fn repository(log: &str) -> CompilationHistory {
        let mut history = CompilationHistory::new();
        history.ingest_log(log).expect("ingest log");
        history.add_class(decode_class(LISTING).expect("decode listing"));
        history
    }

    fn task(body: &str) -> String {
        format!(
            "<task compile_id='1' method='com/example/Foo run ()V' bytes='21' count='10000'>\n{DECLARATIONS}\n{body}\n</task>\n"
        )
    }

    fn run() -> MemberKey {
        MemberKey {
            class_name: "com.example.Foo".to_string(),
            member_name: "run".to_string(),
            param_types: Vec::new(),
        }
    }

    fn helper() -> MemberKey {
        MemberKey {
            class_name: "com.example.Foo".to_string(),
            member_name: "helper".to_string(),
            param_types: Vec::new(),
        }
    }

    fn process() -> MemberKey {
        MemberKey {
            class_name: "com.example.Foo".to_string(),
            member_name: "process".to_string(),
            param_types: vec!["int".to_string()],
        }
    }

    fn annotate(history: &CompilationHistory, member: &MemberKey) -> AnnotationReport {
        AnnotationEngine::new(history, EngineOptions::default())
            .annotate(member, 0)
            .expect("annotate")
    }

    #[test]
    fn inline_success_is_attributed_to_preceding_bc() {
        let history = repository(&task(
            "<parse method='818' uses='10000'>\n<bc code='182' bci='10'/>\n<inline_success reason='inline (hot)'/>\n</parse>",
        ));

        let report = annotate(&history, &run());

        let offsets = report.annotations.for_member(&run()).expect("member annotations");
        assert_eq!(vec![10], offsets.keys().copied().collect::<Vec<_>>());
        let annotations = report.annotations.at(&run(), 10);
        assert_eq!(1, annotations.len());
        assert_eq!(AnnotationKind::InlineSuccess, annotations[0].kind);
        assert!(annotations[0].text.contains("inline (hot)"));
        assert!(report.unhandled_tags.is_empty());
        assert!(report.anomalies.is_empty());
    }

    const FULL_PARSE: &str = "\
<phase name='parse' nodes='3' live='3'>
<parse method='818' uses='10000'>
<bc code='162' bci='6'/>
<branch target_bci='20' taken='1' not_taken='10000' cnt='10001' prob='9.999e-05'/>
<uncommon_trap bci='6' reason='unstable_if' action='reinterpret' comment='taken never'/>
<bc code='182' bci='10'/>
<method id='819' holder='729' name='helper' return='721' flags='2' bytes='5' iicount='10000'/>
<call method='819' count='10000' prof_factor='1' inline='1'/>
<inline_success reason='inline (hot)'/>
<parse method='819' uses='10000'>
<bc code='182' bci='1'/>
<branch taken='0' not_taken='0' cnt='0' prob='never'/>
<parse_done nodes='30' live='29'/>
</parse>
<dependency type='unique_concrete_method' ctxk='729' x='819'/>
<parse_done nodes='40' live='38'/>
</parse>
<phase_done name='parse' nodes='40' live='38'/>
</phase>";

    #[test]
    fn walk_covers_branches_traps_and_calls() {
        let history = repository(&task(FULL_PARSE));

        let report = annotate(&history, &run());

        let branch = report.annotations.at(&run(), 6);
        assert_eq!(2, branch.len());
        assert_eq!(AnnotationKind::Branch, branch[0].kind);
        assert_eq!(
            "Count: 10001\nBranch taken: 1\nBranch not taken: 10000\nTaken probability: 9.999e-05",
            branch[0].text
        );
        assert_eq!(AnnotationKind::UncommonTrap, branch[1].kind);
        assert!(branch[1].text.contains("unstable_if"));

        let inline = &report.annotations.at(&run(), 10)[0];
        assert_eq!(Reference::Member(helper()), inline.reference);
        assert_eq!(
            "Inlined: Yes\nReason: inline (hot)\nCallee: com.example.Foo.helper()\nCount: 10000\nProf factor: 1\nSize: 5 bytes\nInvocations: 10000",
            inline.text
        );
        // the inlined body belongs to helper, not run
        assert!(report.annotations.at(&run(), 1).is_empty());
        assert_eq!(2, report.annotations.for_member(&run()).expect("run").len());
        assert!(report.unhandled_tags.is_empty());
    }

    #[test]
    fn annotating_twice_is_identical() {
        let history = repository(&task(FULL_PARSE));
        let engine = AnnotationEngine::new(&history, EngineOptions::default());

        let first = engine.annotate(&run(), 0).expect("first");
        let second = engine.annotate(&run(), 0).expect("second");

        assert_eq!(first.annotations, second.annotations);
        assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json")
        );
    }

    fn eliminated_allocation(phase: &str) -> String {
        task(&format!(
            "<parse method='818' uses='10000'>\n<parse_done nodes='3' live='3'/>\n</parse>\n<phase name='{phase}' nodes='40' live='38'>\n<eliminate_allocation type='Foo'>\n<jvms bci='35' method='818'/>\n</eliminate_allocation>\n<phase_done name='{phase}' nodes='30' live='28'/>\n</phase>"
        ))
    }

    #[test]
    fn eliminated_allocation_under_legacy_optimizer_phase() {
        let history = repository(&eliminated_allocation("optimizer"));

        let report = annotate(&history, &run());

        assert_eq!(LogShape::Legacy, report.shape);
        assert_eq!(1, report.annotations.len());
        let annotation = &report.annotations.at(&run(), 35)[0];
        assert_eq!(AnnotationKind::EliminatedAllocation, annotation.kind);
        assert_eq!(Reference::Class("Foo".to_string()), annotation.reference);
        assert_eq!("Allocation of Foo eliminated: does not escape", annotation.text);
    }

    #[test]
    fn eliminated_allocation_under_escape_analysis_phase() {
        let history = repository(&eliminated_allocation("escapeAnalysis"));

        let report = annotate(&history, &run());

        assert_eq!(LogShape::Modern, report.shape);
        assert_eq!(1, report.annotations.len());
        let annotation = &report.annotations.at(&run(), 35)[0];
        assert_eq!(AnnotationKind::EliminatedAllocation, annotation.kind);
        assert_eq!(Reference::Class("Foo".to_string()), annotation.reference);
        assert!(report.unhandled_tags.is_empty());
    }

    const INLINED_ELIMINATIONS: &str = "\
<method id='819' holder='729' name='helper' return='721' flags='2' bytes='5' iicount='10000'/>
<klass id='900' name='java/lang/StringBuilder' flags='1'/>
<parse method='818' uses='10000'>
</parse>
<phase name='escapeAnalysis'>
<eliminate_allocation type='900'>
<jvms bci='0' method='819'/>
<jvms bci='10' method='818'/>
</eliminate_allocation>
<eliminate_lock lock='1' kind='coarsened'>
<jvms bci='3' method='818'/>
</eliminate_lock>
</phase>";

    #[test]
    fn inlined_eliminations_are_classified_by_call_site() {
        let history = repository(&task(INLINED_ELIMINATIONS));

        let report = annotate(&history, &run());

        let allocation = &report.annotations.at(&run(), 10)[0];
        assert_eq!(
            "Allocation of java.lang.StringBuilder eliminated due to inlining",
            allocation.text
        );
        let lock = &report.annotations.at(&run(), 3)[0];
        assert_eq!(AnnotationKind::LockCoarsen, lock.kind);
        assert_eq!("Lock coarsened", lock.text);
        assert!(report.annotations.for_member(&helper()).is_none());
    }

    #[test]
    fn inlined_callees_are_annotated_when_enabled() {
        let history = repository(&task(INLINED_ELIMINATIONS));
        let options = EngineOptions {
            annotate_inlined_callees: true,
            ..EngineOptions::default()
        };

        let report = AnnotationEngine::new(&history, options)
            .annotate(&run(), 0)
            .expect("annotate");

        let callee = report.annotations.at(&helper(), 0);
        assert_eq!(1, callee.len());
        assert_eq!(
            "Allocation of java.lang.StringBuilder eliminated: does not escape",
            callee[0].text
        );
        assert_eq!(1, report.annotations.at(&run(), 10).len());
    }

    #[test]
    fn sanity_check_rejects_mismatched_bytecode() {
        let log = task("<parse method='818'>\n<bc code='182' bci='0'/>\n<inline_success reason='inline (hot)'/>\n</parse>");
        let history = repository(&log);

        let result = AnnotationEngine::new(&history, EngineOptions::default()).annotate(&run(), 0);

        match result {
            Err(AnnotationError::SanityCheck {
                offset,
                instruction,
                kind,
            }) => {
                assert_eq!(0, offset);
                assert_eq!("0: aload_0", instruction);
                assert_eq!("INLINE_SUCCESS", kind);
            }
            other => panic!("expected sanity check failure, got {other:?}"),
        }

        let options = EngineOptions {
            sanity_checks: false,
            ..EngineOptions::default()
        };
        let report = AnnotationEngine::new(&history, options)
            .annotate(&run(), 0)
            .expect("unchecked");
        assert_eq!(1, report.annotations.at(&run(), 0).len());
    }

    #[test]
    fn branch_on_missing_offset_reports_none() {
        let log = task("<parse method='818'>\n<bc code='153' bci='5'/>\n<branch cnt='1'/>\n</parse>");
        let history = repository(&log);

        let result = AnnotationEngine::new(&history, EngineOptions::default()).annotate(&run(), 0);

        assert!(matches!(
            result,
            Err(AnnotationError::SanityCheck { ref instruction, .. }) if instruction == "<none>"
        ));
    }

    #[test]
    fn sanity_helpers_follow_opcode_families() {
        let aaload = BytecodeInstruction::new(3, Opcode::Aaload);
        let invoke = BytecodeInstruction::new(4, Opcode::Invokespecial);
        let branch = BytecodeInstruction::new(7, Opcode::IfIcmpne);

        assert!(!sanity_check_inline(Some(&aaload)));
        assert!(!sanity_check_branch(Some(&aaload)));
        assert!(sanity_check_inline(Some(&invoke)));
        assert!(sanity_check_branch(Some(&branch)));
        assert!(!sanity_check_inline(None));
    }

    #[test]
    fn hot_throw_is_placed_at_handler() {
        let log = "\
<task compile_id='4' method='com/example/Foo process (I)I'>
<type id='721' name='int'/>
<klass id='729' name='com/example/Foo' flags='1'/>
<method id='820' holder='729' name='process' return='721' arguments='721' flags='1' bytes='9'/>
<parse method='820'>
<bc code='182' bci='2'/>
<hot_throw preallocated='1' reason='null_check'/>
<intrinsic id='_hashCode' nodes='5'/>
</parse>
</task>
";
        let history = repository(log);
        let process = process();

        let report = annotate(&history, &process);

        let handler = &report.annotations.at(&process, 6)[0];
        assert_eq!(AnnotationKind::HotThrowPreallocated, handler.kind);
        assert_eq!(
            Reference::Class("java.lang.RuntimeException".to_string()),
            handler.reference
        );
        let intrinsic = &report.annotations.at(&process, 2)[0];
        assert_eq!(AnnotationKind::IntrinsicUsed, intrinsic.kind);
        assert_eq!(Reference::Label("_hashCode".to_string()), intrinsic.reference);
    }

    #[test]
    fn hot_throw_without_preallocation_and_uncovered_throw() {
        let log = "\
<task compile_id='5' method='com/example/Foo process (I)I'>
<type id='721' name='int'/>
<klass id='729' name='com/example/Foo' flags='1'/>
<method id='820' holder='729' name='process' return='721' arguments='721' flags='1' bytes='9'/>
<parse method='820'>
<bc code='182' bci='2'/>
<hot_throw preallocated='0' reason='null_check'/>
<bc code='2' bci='7'/>
<hot_throw preallocated='0' reason='range_check'/>
</parse>
</task>
";
        let history = repository(log);

        let report = annotate(&history, &process());

        assert_eq!(1, report.annotations.len());
        let handler = report.annotations.at(&process(), 6);
        assert_eq!(1, handler.len());
        assert_eq!(AnnotationKind::HotThrowNotPreallocated, handler[0].kind);
        assert_eq!(
            "Hot throw at bci 2 (not preallocated)\nReason: null_check",
            handler[0].text
        );
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn failed_inline_and_virtual_call_share_call_site() {
        let log = task(
            "<parse method='818' uses='10000'>\n<bc code='182' bci='10'/>\n<method id='819' holder='729' name='helper' return='721' flags='2' bytes='5' iicount='10000'/>\n<call method='819' count='200' prof_factor='1' virtual='1'/>\n<inline_fail reason='too big'/>\n<virtual_call/>\n</parse>",
        );
        let history = repository(&log);

        let report = annotate(&history, &run());

        let site = report.annotations.at(&run(), 10);
        assert_eq!(2, site.len());
        assert_eq!(AnnotationKind::InlineFail, site[0].kind);
        assert_eq!(
            "Inlined: No\nReason: too big\nCallee: com.example.Foo.helper()\nCount: 200\nProf factor: 1\nSize: 5 bytes\nInvocations: 10000",
            site[0].text
        );
        assert_eq!(Reference::Member(helper()), site[0].reference);
        assert_eq!(AnnotationKind::VirtualCall, site[1].kind);
        assert_eq!("Virtual call to com.example.Foo.helper()", site[1].text);
        assert_eq!(Reference::Member(helper()), site[1].reference);
    }

    const ELIMINATED_LOCKS: &str = "\
<method id='819' holder='729' name='helper' return='721' flags='34' bytes='5' iicount='10000'/>
<parse method='818' uses='10000'>
<bc code='21' bci='3'/>
<uncommon_trap bci='-1' reason='null_check' action='maybe_recompile'/>
</parse>
<phase name='optimizer'>
<eliminate_lock lock='1'>
<jvms bci='-1' method='819'/>
<jvms bci='10' method='818'/>
</eliminate_lock>
<eliminate_lock lock='1'>
<jvms bci='3' method='818'/>
</eliminate_lock>
</phase>";

    #[test]
    fn eliminated_locks_skip_method_entry_locations() {
        let history = repository(&task(ELIMINATED_LOCKS));

        let report = annotate(&history, &run());

        assert_eq!(2, report.annotations.len());
        let inlined = report.annotations.at(&run(), 10);
        assert_eq!(1, inlined.len());
        assert_eq!(AnnotationKind::LockElision, inlined[0].kind);
        assert_eq!("Lock eliminated due to inlining", inlined[0].text);
        let local = report.annotations.at(&run(), 3);
        assert_eq!(1, local.len());
        assert_eq!(AnnotationKind::LockElision, local[0].kind);
        assert_eq!("Lock eliminated: not contended", local[0].text);
        assert!(report.anomalies.is_empty());

        let options = EngineOptions {
            annotate_inlined_callees: true,
            ..EngineOptions::default()
        };
        let report = AnnotationEngine::new(&history, options)
            .annotate(&run(), 0)
            .expect("annotate with callees");
        assert!(report.annotations.for_member(&helper()).is_none());
        assert!(report.unhandled_tags.is_empty());
    }

    #[test]
    fn parse_hir_phase_is_walked() {
        let log = task(
            "<parse method='818'>\n<phase name='parse_hir'>\n<bc code='162' bci='6'/>\n<branch cnt='4' prob='0.5'/>\n<phase_done name='parse_hir'/>\n</phase>\n</parse>",
        );
        let history = repository(&log);

        let report = annotate(&history, &run());

        assert_eq!(LogShape::Modern, report.shape);
        assert_eq!(1, report.annotations.at(&run(), 6).len());
        assert!(report.unhandled_tags.is_empty());
    }

    #[test]
    fn records_before_bc_are_anomalies() {
        let log = task("<parse method='818'>\n<inline_fail reason='too big'/>\n<mystery flag='1'/>\n</parse>");
        let history = repository(&log);

        let report = annotate(&history, &run());

        assert!(report.annotations.is_empty());
        assert_eq!(1, report.anomalies.len());
        assert!(report.anomalies[0].contains("inline_fail"));
        assert!(report.unhandled_tags.contains("mystery"));
    }

    #[test]
    fn unknown_members_and_indexes_yield_empty_reports() {
        let history = repository(&task(FULL_PARSE));
        let engine = AnnotationEngine::new(&history, EngineOptions::default());

        assert!(engine.annotate(&helper(), 0).expect("not compiled").annotations.is_empty());
        assert!(engine.annotate(&run(), 3).expect("no such index").annotations.is_empty());
    }

    #[test]
    fn late_inlined_parse_is_skipped() {
        let log = task(
            "<method id='819' holder='729' name='helper' return='721' flags='2' bytes='5'/>\n<late_inline method='819'>\n<jvms bci='10' method='818'/>\n</late_inline>\n<parse method='819'>\n<bc code='182' bci='1'/>\n<inline_success reason='accessor'/>\n</parse>",
        );
        let history = repository(&log);

        let report = annotate(&history, &run());

        assert!(report.annotations.is_empty());
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn batch_keeps_going_after_failure() {
        let log = format!(
            "{}<task compile_id='2' method='com/example/Foo process (I)I'>\n<type id='721' name='int'/>\n<klass id='729' name='com/example/Foo' flags='1'/>\n<method id='820' holder='729' name='process' return='721' arguments='721'/>\n<parse method='820'>\n<bc code='182' bci='1'/>\n<intrinsic id='_getClass'/>\n</parse>\n</task>\n",
            task(FULL_PARSE)
        );
        let history = repository(&log);

        let batch = AnnotationEngine::new(&history, EngineOptions::default()).annotate_all(0);

        assert_eq!(1, batch.reports.len());
        assert_eq!(1, batch.failures.len());
        assert_eq!("process", batch.failures[0].0.member_name);
        assert_eq!(3, batch.annotations().len());
        assert!(batch.unhandled_tags().is_empty());
    }

    #[test]
    fn vm_version_decides_when_phases_do_not() {
        assert_eq!(Some(8), java_major_version("1.8.0_40-b25"));
        assert_eq!(Some(9), java_major_version("9-ea"));
        assert_eq!(Some(17), java_major_version("17.0.2"));
        assert_eq!(None, java_major_version("unknown"));

        let document = Document::default();
        assert_eq!(LogShape::Unknown, detect_shape(&document, None));
        assert_eq!(LogShape::Legacy, detect_shape(&document, Some("1.8.0_40")));
        assert_eq!(LogShape::Modern, detect_shape(&document, Some("11.0.1")));
    }
}
