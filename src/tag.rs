use std::collections::BTreeMap;

use crate::error::ParseError;

/// Index of a tag inside its [`TagTree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TagId(pub(crate) usize);

/// Classification of a tag name, derived once when the tag is parsed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TagKind {
    Task,
    Nmethod,
    VmVersion,
    Phase,
    PhaseDone,
    Parse,
    ParseDone,
    Bc,
    Call,
    Method,
    Klass,
    Type,
    InlineSuccess,
    InlineFail,
    Branch,
    Intrinsic,
    VirtualCall,
    UncommonTrap,
    HotThrow,
    LateInline,
    EliminateAllocation,
    EliminateLock,
    Jvms,
    DirectCall,
    PredictedCall,
    Dependency,
    AssertNull,
    Observe,
    CastUp,
    InlineLevelDiscount,
    InlineId,
    ReplaceStringConcat,
    Other,
}

impl TagKind {
    pub fn from_name(name: &str) -> TagKind {
        match name {
            "task" => TagKind::Task,
            "nmethod" => TagKind::Nmethod,
            "vm_version" => TagKind::VmVersion,
            "phase" => TagKind::Phase,
            "phase_done" => TagKind::PhaseDone,
            "parse" => TagKind::Parse,
            "parse_done" => TagKind::ParseDone,
            "bc" => TagKind::Bc,
            "call" => TagKind::Call,
            "method" => TagKind::Method,
            "klass" => TagKind::Klass,
            "type" => TagKind::Type,
            "inline_success" => TagKind::InlineSuccess,
            "inline_fail" => TagKind::InlineFail,
            "branch" => TagKind::Branch,
            "intrinsic" => TagKind::Intrinsic,
            "virtual_call" => TagKind::VirtualCall,
            "uncommon_trap" => TagKind::UncommonTrap,
            "hot_throw" => TagKind::HotThrow,
            "late_inline" => TagKind::LateInline,
            "eliminate_allocation" => TagKind::EliminateAllocation,
            "eliminate_lock" => TagKind::EliminateLock,
            "jvms" => TagKind::Jvms,
            "direct_call" => TagKind::DirectCall,
            "predicted_call" => TagKind::PredictedCall,
            "dependency" => TagKind::Dependency,
            "assert_null" => TagKind::AssertNull,
            "observe" => TagKind::Observe,
            "cast_up" => TagKind::CastUp,
            "inline_level_discount" => TagKind::InlineLevelDiscount,
            "inline_id" => TagKind::InlineId,
            "replace_string_concat" => TagKind::ReplaceStringConcat,
            _ => TagKind::Other,
        }
    }
}

/// One tagged record of the compilation log.
#[derive(Clone, Debug)]
pub struct Tag {
    pub name: String,
    pub kind: TagKind,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<TagId>,
    pub parent: Option<TagId>,
    pub self_closing: bool,
    pub text: Vec<String>,
}

impl Tag {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Reads a numeric attribute; a present but unparsable value is an error.
    pub fn numeric_attribute(&self, name: &str) -> Result<Option<u32>, ParseError> {
        let Some(value) = self.attribute(name) else {
            return Ok(None);
        };
        value
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ParseError::InvalidNumber {
                tag: self.name.clone(),
                attribute: name.to_string(),
                value: value.to_string(),
            })
    }

    /// Like [`Tag::numeric_attribute`] but accepts negative values such as the `-1` HotSpot
    /// writes for method-entry locations.
    pub fn signed_attribute(&self, name: &str) -> Result<Option<i64>, ParseError> {
        let Some(value) = self.attribute(name) else {
            return Ok(None);
        };
        value
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ParseError::InvalidNumber {
                tag: self.name.clone(),
                attribute: name.to_string(),
                value: value.to_string(),
            })
    }
}

/// Arena holding every tag of one top-level record.
#[derive(Clone, Debug, Default)]
pub struct TagTree {
    nodes: Vec<Tag>,
}

impl TagTree {
    pub(crate) fn push(&mut self, tag: Tag) -> TagId {
        let id = TagId(self.nodes.len());
        if let Some(parent) = tag.parent {
            self.nodes[parent.0].children.push(id);
        }
        self.nodes.push(tag);
        id
    }

    pub(crate) fn get_mut(&mut self, id: TagId) -> &mut Tag {
        &mut self.nodes[id.0]
    }

    /// The first tag pushed is always the top-level record.
    pub fn root(&self) -> TagId {
        TagId(0)
    }

    pub fn get(&self, id: TagId) -> &Tag {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: TagId) -> impl Iterator<Item = (TagId, &Tag)> + '_ {
        self.get(id)
            .children
            .iter()
            .map(move |child| (*child, self.get(*child)))
    }

    pub fn first_child_named(&self, id: TagId, name: &str) -> Option<TagId> {
        self.children(id)
            .find(|(_, tag)| tag.name == name)
            .map(|(child, _)| child)
    }

    /// Every tag below `id` in document order (depth first, `id` excluded).
    pub fn descendants(&self, id: TagId) -> Vec<TagId> {
        let mut found = Vec::new();
        let mut stack: Vec<TagId> = self.get(id).children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            found.push(next);
            stack.extend(self.get(next).children.iter().rev().copied());
        }
        found
    }

    /// Descendants of the given kind, not descending into matches.
    pub fn outermost_of_kind(&self, id: TagId, kind: TagKind) -> Vec<TagId> {
        let mut found = Vec::new();
        let mut stack: Vec<TagId> = self.get(id).children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if self.get(next).kind == kind {
                found.push(next);
                continue;
            }
            stack.extend(self.get(next).children.iter().rev().copied());
        }
        found
    }

    pub fn siblings(&self, id: TagId) -> Vec<TagId> {
        match self.get(id).parent {
            Some(parent) => self
                .get(parent)
                .children
                .iter()
                .copied()
                .filter(|sibling| *sibling != id)
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, parent: Option<TagId>) -> Tag {
        Tag {
            name: name.to_string(),
            kind: TagKind::from_name(name),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            parent,
            self_closing: false,
            text: Vec::new(),
        }
    }

    #[test]
    fn descendants_follow_document_order() {
        let mut tree = TagTree::default();
        let task = tree.push(tag("task", None));
        let phase = tree.push(tag("phase", Some(task)));
        let parse = tree.push(tag("parse", Some(phase)));
        let bc = tree.push(tag("bc", Some(parse)));
        let done = tree.push(tag("task_done", Some(task)));

        assert_eq!(vec![phase, parse, bc, done], tree.descendants(task));
        assert_eq!(vec![parse], tree.outermost_of_kind(task, TagKind::Parse));
        assert_eq!(vec![done], tree.siblings(phase));
        assert_eq!(TagKind::Other, tree.get(done).kind);
    }

    #[test]
    fn numeric_attribute_rejects_garbage() {
        let mut bc = tag("bc", None);
        bc.attributes.insert("bci".to_string(), "1x".to_string());

        let result = bc.numeric_attribute("bci");

        assert!(matches!(result, Err(ParseError::InvalidNumber { .. })));
        assert_eq!(None, bc.numeric_attribute("code").expect("absent"));
    }

    #[test]
    fn signed_attribute_accepts_method_entry() {
        let mut jvms = tag("jvms", None);
        jvms.attributes.insert("bci".to_string(), "-1".to_string());

        assert!(jvms.numeric_attribute("bci").is_err());
        assert_eq!(Some(-1), jvms.signed_attribute("bci").expect("signed bci"));
    }
}
