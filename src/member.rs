use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::ParseError;
use crate::ir::MemberBytecode;
use crate::signature::{MemberSignatureParts, parse_log_signature};
use crate::tag_processor::Document;

/// Identity of a member across the log and the disassembly.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct MemberKey {
    pub class_name: String,
    pub member_name: String,
    pub param_types: Vec<String>,
}

impl MemberKey {
    pub fn new(class_name: &str, parts: &MemberSignatureParts) -> Self {
        Self {
            class_name: class_name.to_string(),
            member_name: parts.member_name.clone(),
            param_types: parts.param_types.clone(),
        }
    }

    /// Key for a log-dialect signature such as `java/lang/String charAt (I)C`.
    pub fn from_log(signature: &str) -> Result<Self, ParseError> {
        let (class_name, parts) = parse_log_signature(signature)?;
        Ok(Self::new(&class_name, &parts))
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.class_name,
            self.member_name,
            self.param_types.join(", ")
        )
    }
}

/// One compiled version of a member: the `task` record plus what HotSpot reported for it.
#[derive(Debug)]
pub struct Compilation {
    pub compile_id: Option<String>,
    pub compiler: Option<String>,
    pub level: Option<u32>,
    pub osr_bci: Option<u32>,
    pub task: Document,
    pub nmethod: Option<BTreeMap<String, String>>,
}

impl Compilation {
    pub fn new(task: Document) -> Self {
        let root = task.root();
        let attribute = |name: &str| root.attribute(name).map(str::to_string);
        let numeric = |name: &str| root.attribute(name).and_then(|value| value.parse().ok());
        Self {
            compile_id: attribute("compile_id"),
            compiler: attribute("compiler"),
            level: numeric("level"),
            osr_bci: numeric("osr_bci"),
            nmethod: None,
            task,
        }
    }

    pub fn is_osr(&self) -> bool {
        self.osr_bci.is_some()
    }
}

/// Source of compilation histories and decoded bytecode for members.
pub trait MemberRepository {
    fn is_compiled(&self, member: &MemberKey) -> bool;
    fn compilation(&self, member: &MemberKey, index: usize) -> Option<&Compilation>;
    fn bytecode(&self, member: &MemberKey) -> Option<&MemberBytecode>;
    /// Every member with at least one compilation, in a stable order.
    fn compiled_members(&self) -> Vec<MemberKey>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_log_signature() {
        let key = MemberKey::from_log("java/lang/String charAt (I)C").expect("parse");

        assert_eq!("java.lang.String", key.class_name);
        assert_eq!("charAt", key.member_name);
        assert_eq!(vec!["int".to_string()], key.param_types);
        assert_eq!("java.lang.String.charAt(int)", key.to_string());
    }
}
