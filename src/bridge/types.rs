//! Native type metadata: element kinds, struct layouts and the lookup
//! capability that maps a type tag to them.

use std::collections::BTreeMap;
use std::rc::Rc;

/// Marshaling kind of one native element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Bool,
    /// One UTF-16 code unit.
    Unichar,
    /// Opaque pointer-sized slot.
    Pointer,
}

impl ElementKind {
    pub const ALL: [ElementKind; 13] = [
        ElementKind::Int8,
        ElementKind::UInt8,
        ElementKind::Int16,
        ElementKind::UInt16,
        ElementKind::Int32,
        ElementKind::UInt32,
        ElementKind::Int64,
        ElementKind::UInt64,
        ElementKind::Float32,
        ElementKind::Float64,
        ElementKind::Bool,
        ElementKind::Unichar,
        ElementKind::Pointer,
    ];

    pub fn size(self) -> usize {
        match self {
            ElementKind::Int8 | ElementKind::UInt8 | ElementKind::Bool => 1,
            ElementKind::Int16 | ElementKind::UInt16 | ElementKind::Unichar => 2,
            ElementKind::Int32 | ElementKind::UInt32 | ElementKind::Float32 => 4,
            ElementKind::Int64 | ElementKind::UInt64 | ElementKind::Float64 => 8,
            ElementKind::Pointer => std::mem::size_of::<usize>(),
        }
    }

    pub fn align(self) -> usize {
        self.size()
    }

    /// Script-visible name, as used under `interop.types`.
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Int8 => "int8",
            ElementKind::UInt8 => "uint8",
            ElementKind::Int16 => "int16",
            ElementKind::UInt16 => "uint16",
            ElementKind::Int32 => "int32",
            ElementKind::UInt32 => "uint32",
            ElementKind::Int64 => "int64",
            ElementKind::UInt64 => "uint64",
            ElementKind::Float32 => "float",
            ElementKind::Float64 => "double",
            ElementKind::Bool => "bool",
            ElementKind::Unichar => "unichar",
            ElementKind::Pointer => "pointer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ElementKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// One named field of a [`StructLayout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub kind: ElementKind,
    pub offset: usize,
}

/// C-compatible layout of a fixed native record.
///
/// Fields are placed in declaration order with natural alignment and the total
/// size is padded to the largest field alignment, matching `#[repr(C)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    name: String,
    fields: Vec<StructField>,
    size: usize,
    align: usize,
}

impl StructLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            size: 0,
            align: 1,
        }
    }

    /// Append a field after the existing ones.
    pub fn field(mut self, name: impl Into<String>, kind: ElementKind) -> Self {
        let align = kind.align();
        let unpadded = self.fields.last().map(|f| f.offset + f.kind.size()).unwrap_or(0);
        let offset = unpadded.next_multiple_of(align);

        self.fields.push(StructField {
            name: name.into(),
            kind,
            offset,
        });
        self.align = self.align.max(align);
        self.size = (offset + kind.size()).next_multiple_of(self.align);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    pub fn field_named(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }
}

/// Element type of a `Reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Primitive(ElementKind),
    Struct(Rc<StructLayout>),
}

impl TypeDescriptor {
    pub fn size(&self) -> usize {
        match self {
            TypeDescriptor::Primitive(kind) => kind.size(),
            TypeDescriptor::Struct(layout) => layout.size(),
        }
    }

    pub fn align(&self) -> usize {
        match self {
            TypeDescriptor::Primitive(kind) => kind.align(),
            TypeDescriptor::Struct(layout) => layout.align(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TypeDescriptor::Primitive(kind) => kind.name(),
            TypeDescriptor::Struct(layout) => layout.name(),
        }
    }
}

/// Metadata lookup capability: type tag to element size and marshaling kind.
///
/// The bridge only consumes the descriptor; where the metadata comes from is
/// up to the embedder.
pub trait TypeMetadata {
    fn lookup(&self, tag: &str) -> Option<TypeDescriptor>;

    /// Every tag this source can resolve, used to populate `interop.types`.
    fn tags(&self) -> Vec<String>;
}

/// Built-in metadata: every [`ElementKind`] plus registered struct layouts.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    structs: BTreeMap<String, Rc<StructLayout>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a struct layout under its own name, replacing any previous one.
    pub fn register_struct(&mut self, layout: StructLayout) {
        if ElementKind::from_name(layout.name()).is_some() {
            tracing::warn!("Struct '{}' shadows a primitive type name", layout.name());
        }

        self.structs
            .insert(layout.name().to_string(), Rc::new(layout));
    }
}

impl TypeMetadata for TypeRegistry {
    fn lookup(&self, tag: &str) -> Option<TypeDescriptor> {
        if let Some(layout) = self.structs.get(tag) {
            return Some(TypeDescriptor::Struct(layout.clone()));
        }

        ElementKind::from_name(tag).map(TypeDescriptor::Primitive)
    }

    fn tags(&self) -> Vec<String> {
        ElementKind::ALL
            .iter()
            .map(|kind| kind.name().to_string())
            .chain(self.structs.keys().cloned())
            .collect()
    }
}
