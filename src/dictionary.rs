use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::ir::BytecodeInstruction;
use crate::opcodes::Opcode;
use crate::tag::{TagId, TagKind, TagTree};

/// ID-indexed declarations (`type`, `method`, `klass`) of one top-level record.
#[derive(Debug, Default)]
pub struct ParseDictionary {
    types: HashMap<String, TagId>,
    methods: HashMap<String, TagId>,
    klasses: HashMap<String, TagId>,
    opcodes_by_method: RefCell<HashMap<String, BTreeMap<u32, Opcode>>>,
}

impl ParseDictionary {
    /// Records `tag` if it is a declaration carrying an `id`.
    pub(crate) fn declare(&mut self, tree: &TagTree, tag: TagId) {
        let declared = tree.get(tag);
        let Some(id) = declared.attribute("id") else {
            return;
        };
        let map = match declared.kind {
            TagKind::Type => &mut self.types,
            TagKind::Method => &mut self.methods,
            TagKind::Klass => &mut self.klasses,
            _ => return,
        };
        map.insert(id.to_string(), tag);
    }

    pub fn method(&self, id: &str) -> Option<TagId> {
        self.methods.get(id).copied()
    }

    pub fn klass(&self, id: &str) -> Option<TagId> {
        self.klasses.get(id).copied()
    }

    pub fn type_tag(&self, id: &str) -> Option<TagId> {
        self.types.get(id).copied()
    }

    /// Resolves an ID declared either as a `type` or as a `klass`.
    pub fn type_or_klass(&self, id: &str) -> Option<TagId> {
        self.type_tag(id).or_else(|| self.klass(id))
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Opcode at `offset` of the method declared as `method_id`.
    ///
    /// The offset map is built from `instructions` on first use for each method ID.
    pub fn opcode_at<'a>(
        &self,
        method_id: &str,
        offset: u32,
        instructions: impl FnOnce() -> Option<&'a [BytecodeInstruction]>,
    ) -> Option<Opcode> {
        let mut cache = self.opcodes_by_method.borrow_mut();
        if !cache.contains_key(method_id) {
            let instructions = instructions()?;
            let map = instructions
                .iter()
                .map(|instruction| (instruction.offset, instruction.opcode))
                .collect();
            cache.insert(method_id.to_string(), map);
        }
        cache
            .get(method_id)
            .and_then(|map| map.get(&offset))
            .copied()
    }
}
