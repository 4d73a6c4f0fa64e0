//! In-memory [`MemberRepository`] built from a whole compilation log and decoded classes.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::error::ParseError;
use crate::ir::{ClassBytecode, MemberBytecode};
use crate::member::{Compilation, MemberKey, MemberRepository};
use crate::tag::TagKind;
use crate::tag_processor::{Document, TagProcessor, decode_entities};

/// Tags that wrap whole sections of the log rather than describing one record.
const WRAPPER_TAGS: &[&str] = &[
    "hotspot_log",
    "hotspot_log_done",
    "compilation_log",
    "tty",
    "tty_done",
    "destroy_vm",
];

/// Compilation histories per member, in log order.
#[derive(Debug, Default)]
pub struct CompilationHistory {
    processor: TagProcessor,
    members: BTreeMap<MemberKey, Vec<Compilation>>,
    by_compile_id: HashMap<String, (MemberKey, usize)>,
    pending_nmethods: HashMap<String, BTreeMap<String, String>>,
    classes: BTreeMap<String, ClassBytecode>,
    vm_version: Option<String>,
    skipped_tasks: usize,
}

impl CompilationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw (still entity-escaped) log line.
    pub fn ingest_line(&mut self, raw: &str) -> Result<(), ParseError> {
        let line = decode_entities(raw);
        if is_wrapper(&line) {
            return Ok(());
        }
        if let Some(document) = self.processor.process_line(&line)? {
            self.record(document);
        }
        Ok(())
    }

    pub fn ingest_log(&mut self, text: &str) -> Result<(), ParseError> {
        for line in text.lines() {
            self.ingest_line(line)?;
        }
        Ok(())
    }

    pub fn add_class(&mut self, class: ClassBytecode) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn class(&self, name: &str) -> Option<&ClassBytecode> {
        self.classes.get(name)
    }

    pub fn vm_version(&self) -> Option<&str> {
        self.vm_version.as_deref()
    }

    /// Tasks whose `method` attribute could not be turned into a member.
    pub fn skipped_tasks(&self) -> usize {
        self.skipped_tasks
    }

    pub fn compilations(&self, member: &MemberKey) -> &[Compilation] {
        self.members
            .get(member)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_compilations(&self) -> impl Iterator<Item = (&MemberKey, &Compilation)> {
        self.members.iter().flat_map(|(member, compilations)| {
            compilations
                .iter()
                .map(move |compilation| (member, compilation))
        })
    }

    fn record(&mut self, document: Document) {
        match document.root().kind {
            TagKind::Task => self.record_task(document),
            TagKind::Nmethod => self.record_nmethod(&document),
            TagKind::VmVersion => {
                let tree = &document.tree;
                let release = tree
                    .first_child_named(tree.root(), "release")
                    .map(|release| tree.get(release).text.join(" "));
                if let Some(release) = release.filter(|release| !release.is_empty()) {
                    debug!(release = %release, "vm version");
                    self.vm_version = Some(release);
                }
            }
            _ => {}
        }
    }

    fn record_task(&mut self, document: Document) {
        let Some(signature) = document.root().attribute("method").map(str::to_string) else {
            warn!("task without method attribute skipped");
            self.skipped_tasks += 1;
            return;
        };
        let member = match MemberKey::from_log(&signature) {
            Ok(member) => member,
            Err(err) => {
                warn!(error = %err, "task skipped");
                self.skipped_tasks += 1;
                return;
            }
        };

        let mut compilation = Compilation::new(document);
        if let Some(compile_id) = compilation.compile_id.clone() {
            compilation.nmethod = self.pending_nmethods.remove(&compile_id);
            let history = self.members.entry(member.clone()).or_default();
            self.by_compile_id
                .insert(compile_id, (member.clone(), history.len()));
            history.push(compilation);
        } else {
            self.members.entry(member.clone()).or_default().push(compilation);
        }
        debug!(member = %member, "recorded compilation");
    }

    fn record_nmethod(&mut self, document: &Document) {
        let attributes = document.root().attributes.clone();
        let Some(compile_id) = attributes.get("compile_id").cloned() else {
            return;
        };
        let compilation = self
            .by_compile_id
            .get(&compile_id)
            .and_then(|(member, index)| self.members.get_mut(member)?.get_mut(*index));
        match compilation {
            Some(compilation) => compilation.nmethod = Some(attributes),
            None => {
                self.pending_nmethods.insert(compile_id, attributes);
            }
        }
    }
}

impl MemberRepository for CompilationHistory {
    fn is_compiled(&self, member: &MemberKey) -> bool {
        !self.compilations(member).is_empty()
    }

    fn compilation(&self, member: &MemberKey, index: usize) -> Option<&Compilation> {
        self.compilations(member).get(index)
    }

    fn bytecode(&self, member: &MemberKey) -> Option<&MemberBytecode> {
        self.classes
            .get(&member.class_name)?
            .member(&member.member_name, &member.param_types)
    }

    fn compiled_members(&self) -> Vec<MemberKey> {
        self.members
            .iter()
            .filter(|(_, compilations)| !compilations.is_empty())
            .map(|(member, _)| member.clone())
            .collect()
    }
}

fn is_wrapper(line: &str) -> bool {
    let trimmed = line.trim_start();
    let Some(rest) = trimmed.strip_prefix('<') else {
        return false;
    };
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    WRAPPER_TAGS.contains(&&rest[..name_end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disassembly::decode_class;

    const LOG: &str = "\
<?xml version='1.0' encoding='UTF-8'?>
<hotspot_log version='160 1' process='4242' time_ms='1'>
<vm_version>
<name>
Java HotSpot(TM) 64-Bit Server VM
</name>
<release>
1.8.0_40-b25
</release>
</vm_version>
<tty>
<nmethod compile_id='2' compiler='C2' level='4' address='0x1' size='400'/>
</tty>
<compilation_log thread='7'>
<task compile_id='1' method='com/example/Foo add (II)I' bytes='4' count='5000' iicount='5000' level='3' stamp='0.1'>
<task_done success='1' nmsize='120' count='5000' stamp='0.2'/>
</task>
<task compile_id='2' compiler='C2' method='com/example/Foo add (II)I' bytes='4' count='9000' stamp='0.3'>
<phase name='parse' nodes='3' live='3' stamp='0.3'>
<klass id='2' name='com/example/Foo' flags='1'/>
<method id='3' holder='2' name='add' return='1' arguments='1 1' flags='1' bytes='4' iicount='9000'/>
<parse method='3' uses='9000' stamp='0.3'>
</parse>
</phase>
<task_done success='1' nmsize='96' count='9000' stamp='0.4'/>
</task>
<task compile_id='3' method='com/example/Foo &lt;init&gt; ()V' bytes='5' count='1' stamp='0.5'>
</task>
</compilation_log>
<hotspot_log_done stamp='1.0'/>
</hotspot_log>
";

    fn history() -> CompilationHistory {
        let mut history = CompilationHistory::new();
        history.ingest_log(LOG).expect("ingest log");
        history
    }

    fn add_key() -> MemberKey {
        MemberKey {
            class_name: "com.example.Foo".to_string(),
            member_name: "add".to_string(),
            param_types: vec!["int".to_string(), "int".to_string()],
        }
    }

    #[test]
    fn groups_tasks_by_member_in_log_order() {
        let history = history();
        let member = add_key();

        assert!(history.is_compiled(&member));
        assert_eq!(2, history.compilations(&member).len());
        let second = history.compilation(&member, 1).expect("second compilation");
        assert_eq!(Some("2"), second.compile_id.as_deref());
        assert_eq!(Some("C2"), second.compiler.as_deref());
        assert!(history.compilation(&member, 2).is_none());
        assert_eq!(Some(3), history.compilation(&member, 0).and_then(|c| c.level));
        assert_eq!(0, history.skipped_tasks());
    }

    #[test]
    fn attaches_nmethod_and_vm_version() {
        let history = history();

        let second = history.compilation(&add_key(), 1).expect("compilation");
        let nmethod = second.nmethod.as_ref().expect("nmethod");
        assert_eq!(Some(&"400".to_string()), nmethod.get("size"));
        assert_eq!(Some("1.8.0_40-b25"), history.vm_version());
    }

    #[test]
    fn constructors_use_synthetic_name() {
        let history = history();
        let constructor = MemberKey {
            class_name: "com.example.Foo".to_string(),
            member_name: "<init>".to_string(),
            param_types: Vec::new(),
        };

        assert!(history.is_compiled(&constructor));
        assert_eq!(2, history.compiled_members().len());
    }

    #[test]
    fn bytecode_is_found_through_decoded_class() {
        let mut history = history();
        let class = decode_class(
            "public class com.example.Foo {\n  public int add(int, int);\n    Code:\n       0: iload_1\n       1: iload_2\n       2: iadd\n       3: ireturn\n}\n",
        )
        .expect("decode");
        history.add_class(class);

        let bytecode = history.bytecode(&add_key()).expect("bytecode");
        assert_eq!(4, bytecode.instructions.len());
        assert!(history.class("com.example.Foo").is_some());
    }

    #[test]
    fn malformed_log_is_fatal() {
        let mut history = CompilationHistory::new();

        let result = history.ingest_log("<task compile_id='1' method='a/B c ()V'>\n</parse>\n");

        assert!(result.is_err());
    }
}
