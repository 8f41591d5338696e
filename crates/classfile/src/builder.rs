//! Assembling new classes and instruction sequences.

use crate::attribute::{self, RawAttribute};
use crate::class::{ClassUnit, Member, access};
use crate::code::CodeAttribute;
use crate::constant::{ConstantPool, MemberKind};
use crate::error::Result;
use crate::opcode;

/// Java 8; new classes need no stack map frames as long as they do not branch.
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

/// Appends instructions whose operands are interned into a constant pool.
pub struct CodeBuilder<'p> {
    pool: &'p mut ConstantPool,
    code: Vec<u8>,
}

impl<'p> CodeBuilder<'p> {
    pub fn new(pool: &'p mut ConstantPool) -> Self {
        Self {
            pool,
            code: Vec::new(),
        }
    }

    /// An instruction without operands.
    pub fn op(&mut self, opcode: u8) -> &mut Self {
        self.code.push(opcode);
        self
    }

    /// `ldc_w` of a class literal.
    pub fn ldc_class(&mut self, internal_name: &str) -> Result<&mut Self> {
        let index = self.pool.intern_class(internal_name)?;
        Ok(self.with_u2(opcode::LDC_W, index))
    }

    /// `new`, `anewarray`, `checkcast` or `instanceof`.
    pub fn type_insn(&mut self, opcode: u8, internal_name: &str) -> Result<&mut Self> {
        let index = self.pool.intern_class(internal_name)?;
        Ok(self.with_u2(opcode, index))
    }

    /// `invokevirtual`, `invokespecial` or `invokestatic` on a class method.
    pub fn invoke(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self> {
        let index = self
            .pool
            .intern_member_ref(MemberKind::Method, owner, name, descriptor)?;
        Ok(self.with_u2(opcode, index))
    }

    pub fn invoke_interface(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        arg_slots: u8,
    ) -> Result<&mut Self> {
        let index = self
            .pool
            .intern_member_ref(MemberKind::InterfaceMethod, owner, name, descriptor)?;
        self.with_u2(opcode::INVOKEINTERFACE, index);
        // count includes the receiver; the trailing byte is always zero
        self.code.extend_from_slice(&[arg_slots + 1, 0]);
        Ok(self)
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    fn with_u2(&mut self, opcode: u8, index: u16) -> &mut Self {
        self.code.push(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
        self
    }
}

/// Builds a [`ClassUnit`] from scratch.
pub struct ClassBuilder {
    unit: ClassUnit,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: &str) -> Result<Self> {
        let mut constant_pool = ConstantPool::default();
        let this_class = constant_pool.intern_class(name)?;
        let super_class = constant_pool.intern_class(super_name)?;
        Ok(Self {
            unit: ClassUnit {
                minor_version: 0,
                major_version: DEFAULT_MAJOR_VERSION,
                constant_pool,
                access_flags: access::ACC_PUBLIC | access::ACC_SUPER,
                this_class,
                super_class,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                attributes: Vec::new(),
            },
        })
    }

    pub fn access(mut self, access_flags: u16) -> Self {
        self.unit.access_flags = access_flags;
        self
    }

    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.unit.constant_pool
    }

    pub fn implements(mut self, interface: &str) -> Result<Self> {
        let index = self.unit.constant_pool.intern_class(interface)?;
        self.unit.interfaces.push(index);
        Ok(self)
    }

    /// Class-level generic `Signature`.
    pub fn signature(mut self, signature: &str) -> Result<Self> {
        let attribute = signature_attribute(&mut self.unit.constant_pool, signature)?;
        self.unit.attributes.push(attribute);
        Ok(self)
    }

    /// A class attribute with an already-encoded payload.
    pub fn attribute(mut self, name: &str, info: Vec<u8>) -> Result<Self> {
        let name_index = self.unit.constant_pool.intern_utf8(name)?;
        self.unit.attributes.push(RawAttribute { name_index, info });
        Ok(self)
    }

    pub fn field(
        mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
    ) -> Result<Self> {
        let member = self.member(access_flags, name, descriptor, signature)?;
        self.unit.fields.push(member);
        Ok(self)
    }

    /// Adds a method; `code` is `None` for abstract and native methods.
    pub fn method(
        mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        code: Option<CodeAttribute>,
    ) -> Result<Self> {
        let mut member = self.member(access_flags, name, descriptor, signature)?;
        if let Some(code) = code {
            let name_index = self.unit.constant_pool.intern_utf8(attribute::CODE)?;
            member.attributes.insert(
                0,
                RawAttribute {
                    name_index,
                    info: code.to_bytes()?,
                },
            );
        }
        self.unit.methods.push(member);
        Ok(self)
    }

    /// Adds a method whose body is assembled against this class's pool.
    pub fn method_with(
        mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        body: impl FnOnce(&mut CodeBuilder<'_>) -> Result<()>,
    ) -> Result<Self> {
        let mut code = CodeBuilder::new(&mut self.unit.constant_pool);
        body(&mut code)?;
        let code = CodeAttribute::new(max_stack, max_locals, code.finish());
        self.method(access_flags, name, descriptor, None, Some(code))
    }

    pub fn build(self) -> ClassUnit {
        self.unit
    }

    fn member(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
    ) -> Result<Member> {
        let pool = &mut self.unit.constant_pool;
        let mut attributes = Vec::new();
        if let Some(signature) = signature {
            attributes.push(signature_attribute(pool, signature)?);
        }
        Ok(Member {
            access_flags,
            name_index: pool.intern_utf8(name)?,
            descriptor_index: pool.intern_utf8(descriptor)?,
            attributes,
        })
    }
}

fn signature_attribute(pool: &mut ConstantPool, signature: &str) -> Result<RawAttribute> {
    let name_index = pool.intern_utf8(attribute::SIGNATURE)?;
    let signature_index = pool.intern_utf8(signature)?;
    Ok(RawAttribute {
        name_index,
        info: signature_index.to_be_bytes().to_vec(),
    })
}
