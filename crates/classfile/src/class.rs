use crate::attribute::{RawAttribute, find_attribute, parse_attributes, write_attributes};
use crate::constant::ConstantPool;
use crate::error::Result;
use crate::reader::{ClassReader, WriteBe, checked_u2};

pub mod access {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_PRIVATE: u16 = 0x0002;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_SUPER: u16 = 0x0020;
    pub const ACC_BRIDGE: u16 = 0x0040;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;
    pub const ACC_SYNTHETIC: u16 = 0x1000;
}

/// A field or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<RawAttribute>,
}

impl Member {
    pub fn name<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str> {
        pool.utf8(self.name_index)
    }

    pub fn descriptor<'p>(&self, pool: &'p ConstantPool) -> Result<&'p str> {
        pool.utf8(self.descriptor_index)
    }

    pub fn attribute(&self, pool: &ConstantPool, name: &str) -> Option<(usize, &RawAttribute)> {
        find_attribute(&self.attributes, pool, name)
    }

    fn parse(reader: &mut ClassReader<'_>) -> Result<Self> {
        Ok(Self {
            access_flags: reader.read_u2()?,
            name_index: reader.read_u2()?,
            descriptor_index: reader.read_u2()?,
            attributes: parse_attributes(reader)?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.put_u2(self.access_flags);
        out.put_u2(self.name_index);
        out.put_u2(self.descriptor_index);
        write_attributes(out, &self.attributes)
    }
}

/// One compiled class file, decoded down to raw attributes.
///
/// Method bodies stay encoded until a caller asks for them through
/// [`crate::code::CodeAttribute::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassUnit {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<RawAttribute>,
}

impl ClassUnit {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = ClassReader::new(bytes);
        reader.expect_magic()?;
        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;
        let access_flags = reader.read_u2()?;
        let this_class = reader.read_u2()?;
        let super_class = reader.read_u2()?;

        let interfaces_count = reader.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(reader.read_u2()?);
        }

        let fields_count = reader.read_u2()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            fields.push(Member::parse(&mut reader)?);
        }

        let methods_count = reader.read_u2()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            methods.push(Member::parse(&mut reader)?);
        }

        let attributes = parse_attributes(&mut reader)?;

        let unit = Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        // Fail early on a dangling this_class rather than at routing time.
        unit.name()?;
        Ok(unit)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.put_u4(0xCAFEBABE);
        out.put_u2(self.minor_version);
        out.put_u2(self.major_version);
        self.constant_pool.write(&mut out)?;
        out.put_u2(self.access_flags);
        out.put_u2(self.this_class);
        out.put_u2(self.super_class);
        out.put_u2(checked_u2(self.interfaces.len(), "interface count")?);
        for interface in &self.interfaces {
            out.put_u2(*interface);
        }
        out.put_u2(checked_u2(self.fields.len(), "field count")?);
        for field in &self.fields {
            field.write(&mut out)?;
        }
        out.put_u2(checked_u2(self.methods.len(), "method count")?);
        for method in &self.methods {
            method.write(&mut out)?;
        }
        write_attributes(&mut out, &self.attributes)?;
        Ok(out)
    }

    /// Internal (slash-separated) name of this class.
    pub fn name(&self) -> Result<&str> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|method| {
            method.name(&self.constant_pool).is_ok_and(|n| n == name)
                && method
                    .descriptor(&self.constant_pool)
                    .is_ok_and(|d| d == descriptor)
        })
    }

    pub fn attribute(&self, name: &str) -> Option<(usize, &RawAttribute)> {
        find_attribute(&self.attributes, &self.constant_pool, name)
    }
}
