use crate::constant::ConstantPool;
use crate::error::{ClassfileError, Result};
use crate::reader::{ClassReader, WriteBe, checked_u2, checked_u4};

pub const CODE: &str = "Code";
pub const SIGNATURE: &str = "Signature";
pub const STACK_MAP_TABLE: &str = "StackMapTable";
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";

/// An attribute kept as its undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl RawAttribute {
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str> {
        pool.utf8(self.name_index)
    }

    /// Payload of a `Signature` attribute: the index of the signature string.
    pub fn signature_index(&self) -> Result<u16> {
        match self.info.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(ClassfileError::MalformedAttribute {
                name: SIGNATURE,
                reason: format!("expected 2 bytes, found {}", self.info.len()),
            }),
        }
    }
}

pub(crate) fn parse_attributes(reader: &mut ClassReader<'_>) -> Result<Vec<RawAttribute>> {
    let count = reader.read_u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let info = reader.read_slice(length)?.to_vec();
        attributes.push(RawAttribute { name_index, info });
    }
    Ok(attributes)
}

pub(crate) fn write_attributes(out: &mut Vec<u8>, attributes: &[RawAttribute]) -> Result<()> {
    out.put_u2(checked_u2(attributes.len(), "attribute count")?);
    for attribute in attributes {
        out.put_u2(attribute.name_index);
        out.put_u4(checked_u4(attribute.info.len(), "attribute length")?);
        out.extend_from_slice(&attribute.info);
    }
    Ok(())
}

/// Finds the first attribute with the given name.
pub fn find_attribute<'a>(
    attributes: &'a [RawAttribute],
    pool: &ConstantPool,
    name: &str,
) -> Option<(usize, &'a RawAttribute)> {
    attributes
        .iter()
        .enumerate()
        .find(|(_, attribute)| attribute.name(pool).is_ok_and(|n| n == name))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Field descriptor of the annotation type, e.g. `Lcom/example/Marker;`.
    pub type_descriptor: String,
    pub elements: Vec<(String, ElementValue)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    /// A primitive or string constant; `tag` is the element value tag.
    Const { tag: u8, const_value_index: u16 },
    Enum {
        type_descriptor: String,
        const_name: String,
    },
    /// Return descriptor of a class literal, e.g. `Lcom/example/Api;`.
    Class(String),
    Annotation(Box<Annotation>),
    Array(Vec<ElementValue>),
}

/// Encodes a `Runtime[In]VisibleAnnotations` payload, interning names into `pool`.
pub fn encode_annotations(annotations: &[Annotation], pool: &mut ConstantPool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.put_u2(checked_u2(annotations.len(), "annotation count")?);
    for annotation in annotations {
        encode_annotation(annotation, pool, &mut out)?;
    }
    Ok(out)
}

fn encode_annotation(annotation: &Annotation, pool: &mut ConstantPool, out: &mut Vec<u8>) -> Result<()> {
    out.put_u2(pool.intern_utf8(&annotation.type_descriptor)?);
    out.put_u2(checked_u2(annotation.elements.len(), "annotation element count")?);
    for (name, value) in &annotation.elements {
        out.put_u2(pool.intern_utf8(name)?);
        encode_element_value(value, pool, out)?;
    }
    Ok(())
}

fn encode_element_value(value: &ElementValue, pool: &mut ConstantPool, out: &mut Vec<u8>) -> Result<()> {
    match value {
        ElementValue::Const {
            tag,
            const_value_index,
        } => {
            out.put_u1(*tag);
            out.put_u2(*const_value_index);
        }
        ElementValue::Enum {
            type_descriptor,
            const_name,
        } => {
            out.put_u1(b'e');
            out.put_u2(pool.intern_utf8(type_descriptor)?);
            out.put_u2(pool.intern_utf8(const_name)?);
        }
        ElementValue::Class(descriptor) => {
            out.put_u1(b'c');
            out.put_u2(pool.intern_utf8(descriptor)?);
        }
        ElementValue::Annotation(nested) => {
            out.put_u1(b'@');
            encode_annotation(nested, pool, out)?;
        }
        ElementValue::Array(values) => {
            out.put_u1(b'[');
            out.put_u2(checked_u2(values.len(), "array element count")?);
            for value in values {
                encode_element_value(value, pool, out)?;
            }
        }
    }
    Ok(())
}
