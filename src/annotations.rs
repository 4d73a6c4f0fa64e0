use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::member::MemberKey;

/// What the optimizer did at an annotated bytecode offset.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnotationKind {
    Branch,
    InlineSuccess,
    InlineFail,
    EliminatedAllocation,
    LockElision,
    LockCoarsen,
    IntrinsicUsed,
    UncommonTrap,
    HotThrowPreallocated,
    HotThrowNotPreallocated,
    VirtualCall,
}

impl AnnotationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationKind::Branch => "BRANCH",
            AnnotationKind::InlineSuccess => "INLINE_SUCCESS",
            AnnotationKind::InlineFail => "INLINE_FAIL",
            AnnotationKind::EliminatedAllocation => "ELIMINATED_ALLOCATION",
            AnnotationKind::LockElision => "LOCK_ELISION",
            AnnotationKind::LockCoarsen => "LOCK_COARSEN",
            AnnotationKind::IntrinsicUsed => "INTRINSIC_USED",
            AnnotationKind::UncommonTrap => "UNCOMMON_TRAP",
            AnnotationKind::HotThrowPreallocated => "HOT_THROW_PREALLOCATED",
            AnnotationKind::HotThrowNotPreallocated => "HOT_THROW_NOT_PREALLOCATED",
            AnnotationKind::VirtualCall => "VIRTUAL_CALL",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target a renderer may link an annotation to. Not interpreted by the engine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reference {
    Member(MemberKey),
    Class(String),
    Label(String),
    None,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LineAnnotation {
    pub text: String,
    pub kind: AnnotationKind,
    pub reference: Reference,
}

impl LineAnnotation {
    pub fn new(kind: AnnotationKind, text: impl Into<String>, reference: Reference) -> Self {
        Self {
            text: text.into(),
            kind,
            reference,
        }
    }
}

/// Annotations keyed by member, then by ascending bytecode offset.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AnnotationSet {
    members: BTreeMap<MemberKey, BTreeMap<u32, Vec<LineAnnotation>>>,
}

impl AnnotationSet {
    /// Adds an annotation unless an identical one is already recorded at that offset.
    pub fn add(&mut self, member: &MemberKey, offset: u32, annotation: LineAnnotation) -> bool {
        let at_offset = self
            .members
            .entry(member.clone())
            .or_default()
            .entry(offset)
            .or_default();
        if at_offset.contains(&annotation) {
            return false;
        }
        at_offset.push(annotation);
        true
    }

    pub fn for_member(&self, member: &MemberKey) -> Option<&BTreeMap<u32, Vec<LineAnnotation>>> {
        self.members.get(member)
    }

    pub fn at(&self, member: &MemberKey, offset: u32) -> &[LineAnnotation] {
        self.members
            .get(member)
            .and_then(|offsets| offsets.get(&offset))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn members(&self) -> impl Iterator<Item = &MemberKey> {
        self.members.keys()
    }

    /// Every annotation as (member, offset, annotation) in member then offset order.
    pub fn iter(&self) -> impl Iterator<Item = (&MemberKey, u32, &LineAnnotation)> {
        self.members.iter().flat_map(|(member, offsets)| {
            offsets.iter().flat_map(move |(offset, annotations)| {
                annotations
                    .iter()
                    .map(move |annotation| (member, *offset, annotation))
            })
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn merge(&mut self, other: AnnotationSet) {
        for (member, offsets) in other.members {
            for (offset, annotations) in offsets {
                for annotation in annotations {
                    self.add(&member, offset, annotation);
                }
            }
        }
    }
}

/// Serialized as `{"Class.member(params)": {"offset": [annotation, ...]}}`.
impl Serialize for AnnotationSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.members.len()))?;
        for (member, offsets) in &self.members {
            map.serialize_entry(&member.to_string(), offsets)?;
        }
        map.end()
    }
}
