//! Constant pool model.
//!
//! Entries are kept exactly as read so that untouched entries serialize to
//! the same bytes. New entries are only ever appended; an index handed out
//! once keeps pointing at the same constant.

use crate::error::{ClassfileError, Result};
use crate::reader::{ClassReader, WriteBe};

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// A string in the JVM's modified UTF-8 encoding.
///
/// The raw bytes are authoritative; `text` is the decoded view used for
/// comparisons and rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JavaString {
    bytes: Vec<u8>,
    text: String,
}

impl JavaString {
    pub fn new(text: &str) -> Self {
        let mut bytes = Vec::with_capacity(text.len());
        for unit in text.encode_utf16() {
            match unit {
                0x0001..=0x007F => bytes.push(unit as u8),
                0x0000 | 0x0080..=0x07FF => {
                    bytes.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                    bytes.push(0x80 | (unit & 0x3F) as u8);
                }
                _ => {
                    bytes.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                    bytes.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                    bytes.push(0x80 | (unit & 0x3F) as u8);
                }
            }
        }
        Self {
            bytes,
            text: text.to_string(),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut units = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            let continuation = |at: usize| -> Result<u16> {
                match bytes.get(at) {
                    Some(c) if c & 0xC0 == 0x80 => Ok((c & 0x3F) as u16),
                    _ => Err(ClassfileError::Utf8Decode),
                }
            };
            if b & 0x80 == 0 {
                units.push(b as u16);
                i += 1;
            } else if b & 0xE0 == 0xC0 {
                units.push((((b & 0x1F) as u16) << 6) | continuation(i + 1)?);
                i += 2;
            } else if b & 0xF0 == 0xE0 {
                units.push(
                    (((b & 0x0F) as u16) << 12) | (continuation(i + 1)? << 6) | continuation(i + 2)?,
                );
                i += 3;
            } else {
                return Err(ClassfileError::Utf8Decode);
            }
        }
        Ok(Self {
            text: String::from_utf16_lossy(&units),
            bytes,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Utf8(JavaString),
    Integer(i32),
    /// Raw IEEE 754 bits, kept verbatim.
    Float(u32),
    Long(i64),
    /// Raw IEEE 754 bits, kept verbatim.
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    MethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType(u16),
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module(u16),
    Package(u16),
    /// Slot 0 and the upper half of `Long`/`Double` entries.
    Unusable,
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// The kind of symbolic member reference an instruction operand points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

/// A resolved `FieldRef`/`MethodRef`/`InterfaceMethodRef`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub kind: MemberKind,
    pub class_index: u16,
    pub name_and_type_index: u16,
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self {
            entries: vec![Constant::Unusable],
        }
    }
}

impl ConstantPool {
    pub(crate) fn parse(reader: &mut ClassReader<'_>) -> Result<Self> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);

        while entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                TAG_UTF8 => {
                    let length = reader.read_u2()? as usize;
                    let bytes = reader.read_slice(length)?;
                    Constant::Utf8(JavaString::from_bytes(bytes.to_vec())?)
                }
                TAG_INTEGER => Constant::Integer(reader.read_u4()? as i32),
                TAG_FLOAT => Constant::Float(reader.read_u4()?),
                TAG_LONG => {
                    let high = reader.read_u4()? as u64;
                    let low = reader.read_u4()? as u64;
                    Constant::Long(((high << 32) | low) as i64)
                }
                TAG_DOUBLE => {
                    let high = reader.read_u4()? as u64;
                    let low = reader.read_u4()? as u64;
                    Constant::Double((high << 32) | low)
                }
                TAG_CLASS => Constant::Class(reader.read_u2()?),
                TAG_STRING => Constant::String(reader.read_u2()?),
                TAG_FIELDREF => Constant::FieldRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_METHODREF => Constant::MethodRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_NAME_AND_TYPE => Constant::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                TAG_METHOD_HANDLE => Constant::MethodHandle {
                    reference_kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                TAG_METHOD_TYPE => Constant::MethodType(reader.read_u2()?),
                TAG_DYNAMIC => Constant::Dynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                TAG_MODULE => Constant::Module(reader.read_u2()?),
                TAG_PACKAGE => Constant::Package(reader.read_u2()?),
                other => return Err(ClassfileError::UnsupportedConstant { tag: other }),
            };

            let wide = entry.is_wide();
            entries.push(entry);
            if wide {
                entries.push(Constant::Unusable);
            }
        }

        if entries.len() != count {
            // A wide constant in the last slot overruns the declared count.
            return Err(ClassfileError::InvalidConstantIndex {
                index: (count as u16).saturating_sub(1),
            });
        }

        Ok(Self { entries })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.put_u2(crate::reader::checked_u2(self.entries.len(), "constant pool")?);
        for entry in &self.entries {
            match entry {
                Constant::Unusable => {}
                Constant::Utf8(s) => {
                    out.put_u1(TAG_UTF8);
                    out.put_u2(crate::reader::checked_u2(s.as_bytes().len(), "UTF-8 constant")?);
                    out.extend_from_slice(s.as_bytes());
                }
                Constant::Integer(v) => {
                    out.put_u1(TAG_INTEGER);
                    out.put_u4(*v as u32);
                }
                Constant::Float(bits) => {
                    out.put_u1(TAG_FLOAT);
                    out.put_u4(*bits);
                }
                Constant::Long(v) => {
                    out.put_u1(TAG_LONG);
                    out.put_u4(((*v as u64) >> 32) as u32);
                    out.put_u4(*v as u64 as u32);
                }
                Constant::Double(bits) => {
                    out.put_u1(TAG_DOUBLE);
                    out.put_u4((bits >> 32) as u32);
                    out.put_u4(*bits as u32);
                }
                Constant::Class(i) => {
                    out.put_u1(TAG_CLASS);
                    out.put_u2(*i);
                }
                Constant::String(i) => {
                    out.put_u1(TAG_STRING);
                    out.put_u2(*i);
                }
                Constant::FieldRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.put_u1(TAG_FIELDREF);
                    out.put_u2(*class_index);
                    out.put_u2(*name_and_type_index);
                }
                Constant::MethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.put_u1(TAG_METHODREF);
                    out.put_u2(*class_index);
                    out.put_u2(*name_and_type_index);
                }
                Constant::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.put_u1(TAG_INTERFACE_METHODREF);
                    out.put_u2(*class_index);
                    out.put_u2(*name_and_type_index);
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    out.put_u1(TAG_NAME_AND_TYPE);
                    out.put_u2(*name_index);
                    out.put_u2(*descriptor_index);
                }
                Constant::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    out.put_u1(TAG_METHOD_HANDLE);
                    out.put_u1(*reference_kind);
                    out.put_u2(*reference_index);
                }
                Constant::MethodType(i) => {
                    out.put_u1(TAG_METHOD_TYPE);
                    out.put_u2(*i);
                }
                Constant::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    out.put_u1(TAG_DYNAMIC);
                    out.put_u2(*bootstrap_method_attr_index);
                    out.put_u2(*name_and_type_index);
                }
                Constant::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    out.put_u1(TAG_INVOKE_DYNAMIC);
                    out.put_u2(*bootstrap_method_attr_index);
                    out.put_u2(*name_and_type_index);
                }
                Constant::Module(i) => {
                    out.put_u1(TAG_MODULE);
                    out.put_u2(*i);
                }
                Constant::Package(i) => {
                    out.put_u1(TAG_PACKAGE);
                    out.put_u2(*i);
                }
            }
        }
        Ok(())
    }

    /// Number of slots, including slot 0 and wide-constant padding.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Every `Utf8` entry with its index.
    pub fn utf8_entries(&self) -> impl Iterator<Item = (u16, &str)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Constant::Utf8(value) => Some((index as u16, value.as_str())),
                _ => None,
            })
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(ClassfileError::InvalidConstantIndex { index }),
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value.as_str()),
            _ => Err(ClassfileError::InvalidConstantIndex { index }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class(name_index) => self.utf8(*name_index),
            _ => Err(ClassfileError::InvalidConstantIndex { index }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ClassfileError::InvalidConstantIndex { index }),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (kind, class_index, name_and_type_index) = match self.get(index)? {
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            } => (MemberKind::Field, *class_index, *name_and_type_index),
            Constant::MethodRef {
                class_index,
                name_and_type_index,
            } => (MemberKind::Method, *class_index, *name_and_type_index),
            Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => (MemberKind::InterfaceMethod, *class_index, *name_and_type_index),
            _ => return Err(ClassfileError::InvalidConstantIndex { index }),
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            kind,
            class_index,
            name_and_type_index,
            owner: self.class_name(class_index)?,
            name,
            descriptor,
        })
    }

    /// Appends a constant without looking for an existing equal entry.
    pub fn push(&mut self, constant: Constant) -> Result<u16> {
        let index = self.entries.len();
        let slots = if constant.is_wide() { 2 } else { 1 };
        // The count field is a u2 and slot 0 is implicit.
        if index + slots > u16::MAX as usize {
            return Err(ClassfileError::ConstantPoolOverflow);
        }
        let wide = constant.is_wide();
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index as u16)
    }

    /// Returns the index of an equal constant, appending one when absent.
    pub fn intern(&mut self, constant: Constant) -> Result<u16> {
        if let Some(index) = self.entries.iter().position(|entry| *entry == constant) {
            if !matches!(constant, Constant::Unusable) {
                return Ok(index as u16);
            }
        }
        self.push(constant)
    }

    pub fn intern_utf8(&mut self, text: &str) -> Result<u16> {
        self.intern(Constant::Utf8(JavaString::new(text)))
    }

    pub fn intern_class(&mut self, internal_name: &str) -> Result<u16> {
        let name_index = self.intern_utf8(internal_name)?;
        self.intern(Constant::Class(name_index))
    }

    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.intern_utf8(name)?;
        let descriptor_index = self.intern_utf8(descriptor)?;
        self.intern(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn intern_member_ref(
        &mut self,
        kind: MemberKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        let class_index = self.intern_class(owner)?;
        let name_and_type_index = self.intern_name_and_type(name, descriptor)?;
        self.intern(member_constant(kind, class_index, name_and_type_index))
    }
}

pub(crate) fn member_constant(kind: MemberKind, class_index: u16, name_and_type_index: u16) -> Constant {
    match kind {
        MemberKind::Field => Constant::FieldRef {
            class_index,
            name_and_type_index,
        },
        MemberKind::Method => Constant::MethodRef {
            class_index,
            name_and_type_index,
        },
        MemberKind::InterfaceMethod => Constant::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        },
    }
}
