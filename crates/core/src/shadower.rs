//! Reference shadower.
//!
//! Moves a compiled class from dynamic to static provider discovery by
//! replacing every reference to the dynamic loader type with the static
//! facade type.

use crate::error::Result;
use ristretto_classfile::FieldType;
use shadowloader_classfile::attribute::{
    CODE, LOCAL_VARIABLE_TABLE, LOCAL_VARIABLE_TYPE_TABLE, SIGNATURE, STACK_MAP_TABLE,
};
use shadowloader_classfile::opcode::{
    ANEWARRAY, CHECKCAST, GETSTATIC, INSTANCEOF, INVOKEINTERFACE, INVOKEVIRTUAL, MULTIANEWARRAY,
    NEW, PUTFIELD,
};
use shadowloader_classfile::stackmap::{self, VerificationType};
use shadowloader_classfile::{
    ClassUnit, ClassfileError, CodeAttribute, ConstantPool, Member, RawAttribute, TypeSubstitution,
};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ShadowOutcome {
    pub bytes: Vec<u8>,
    /// Descriptors, signatures and operands that were redirected.
    pub sites: usize,
}

impl ShadowOutcome {
    pub fn is_changed(&self) -> bool {
        self.sites > 0
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceShadower {
    substitution: TypeSubstitution,
}

impl ReferenceShadower {
    pub fn new(substitution: TypeSubstitution) -> Self {
        Self { substitution }
    }

    /// Returns the unit with every reference redirected, or the input bytes
    /// untouched when there is nothing to redirect.
    ///
    /// New constants are appended and operands keep their width, so code
    /// layout and every existing constant stay as they were.
    pub fn shadow(&self, bytes: &[u8]) -> Result<ShadowOutcome> {
        let mut unit = ClassUnit::parse(bytes)?;
        let source = self.substitution.source_type();
        if !unit
            .constant_pool
            .utf8_entries()
            .any(|(_, text)| text.contains(source))
        {
            return Ok(unchanged(bytes));
        }

        let ClassUnit {
            constant_pool,
            fields,
            methods,
            attributes,
            ..
        } = &mut unit;
        let mut rewriter = Rewriter {
            substitution: &self.substitution,
            pool: constant_pool,
            sites: 0,
        };

        rewriter.signatures(attributes)?;
        for field in fields.iter_mut() {
            rewriter.member(field)?;
        }
        for method in methods.iter_mut() {
            rewriter.member(method)?;
        }

        let sites = rewriter.sites;
        if sites == 0 {
            return Ok(unchanged(bytes));
        }
        debug!("Shadowed {} reference sites in {}", sites, unit.name()?);
        Ok(ShadowOutcome {
            bytes: unit.to_bytes()?,
            sites,
        })
    }
}

fn unchanged(bytes: &[u8]) -> ShadowOutcome {
    ShadowOutcome {
        bytes: bytes.to_vec(),
        sites: 0,
    }
}

struct Rewriter<'a> {
    substitution: &'a TypeSubstitution,
    pool: &'a mut ConstantPool,
    sites: usize,
}

impl Rewriter<'_> {
    fn member(&mut self, member: &mut Member) -> Result<()> {
        if let Some(index) = self.descriptor(member.descriptor_index)? {
            member.descriptor_index = index;
        }
        self.signatures(&mut member.attributes)?;

        for raw in member.attributes.iter_mut() {
            if raw.name(self.pool)? == CODE {
                self.code(raw)?;
            }
        }
        Ok(())
    }

    fn signatures(&mut self, attributes: &mut [RawAttribute]) -> Result<()> {
        for raw in attributes.iter_mut() {
            if raw.name(self.pool)? != SIGNATURE {
                continue;
            }
            if let Some(index) = self.signature(raw.signature_index()?)? {
                raw.info = index.to_be_bytes().to_vec();
            }
        }
        Ok(())
    }

    fn code(&mut self, raw: &mut RawAttribute) -> Result<()> {
        let mut code = CodeAttribute::parse(&raw.info)?;
        let before = self.sites;

        for insn in code.instructions()? {
            let operand = insn.u2_operand(&code.code);
            let replacement = match insn.opcode {
                GETSTATIC..=PUTFIELD => self.field_ref(operand)?,
                INVOKEVIRTUAL..=INVOKEINTERFACE => self.method_ref(operand)?,
                NEW | ANEWARRAY | CHECKCAST | INSTANCEOF | MULTIANEWARRAY => {
                    self.class_ref(operand)?
                }
                _ => None,
            };
            if let Some(index) = replacement {
                code.code[insn.offset + 1..insn.offset + 3].copy_from_slice(&index.to_be_bytes());
            }
        }

        for nested in code.attributes.iter_mut() {
            let name = nested.name(self.pool)?;
            if name == STACK_MAP_TABLE {
                self.stack_map(nested)?;
            } else if name == LOCAL_VARIABLE_TABLE {
                self.local_variables(nested, true)?;
            } else if name == LOCAL_VARIABLE_TYPE_TABLE {
                self.local_variables(nested, false)?;
            }
        }

        if self.sites > before {
            raw.info = code.to_bytes()?;
        }
        Ok(())
    }

    fn stack_map(&mut self, raw: &mut RawAttribute) -> Result<()> {
        let mut frames = stackmap::parse(&raw.info)?;
        let mut changed = false;
        for frame in frames.iter_mut() {
            for vt in frame.verification_types_mut() {
                if let VerificationType::Object(index) = vt {
                    if let Some(replacement) = self.class_ref(*index)? {
                        *index = replacement;
                        changed = true;
                    }
                }
            }
        }
        if changed {
            raw.info = stackmap::encode(&frames)?;
        }
        Ok(())
    }

    /// `LocalVariableTable` entries carry descriptors, `LocalVariableTypeTable`
    /// entries carry signatures; both sit at byte 6 of a 10-byte entry.
    fn local_variables(&mut self, raw: &mut RawAttribute, descriptors: bool) -> Result<()> {
        let malformed = || ClassfileError::MalformedAttribute {
            name: if descriptors {
                LOCAL_VARIABLE_TABLE
            } else {
                LOCAL_VARIABLE_TYPE_TABLE
            },
            reason: "truncated entry".to_string(),
        };
        let count = raw
            .info
            .get(0..2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or_else(malformed)?;
        if raw.info.len() < 2 + count * 10 {
            return Err(malformed().into());
        }
        for entry in 0..count {
            let at = 2 + entry * 10 + 6;
            let index = u16::from_be_bytes([raw.info[at], raw.info[at + 1]]);
            let replacement = if descriptors {
                self.descriptor(index)?
            } else {
                self.signature(index)?
            };
            if let Some(replacement) = replacement {
                raw.info[at..at + 2].copy_from_slice(&replacement.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Field instructions keep their owner; only the field type moves.
    fn field_ref(&mut self, index: u16) -> Result<Option<u16>> {
        let member = self.pool.member_ref(index)?;
        let Some(descriptor) = self.substitution.in_descriptor(member.descriptor) else {
            return Ok(None);
        };
        let (kind, owner, name) = (member.kind, member.owner.to_string(), member.name.to_string());
        validate_descriptor(&descriptor)?;
        self.sites += 1;
        Ok(Some(self.pool.intern_member_ref(kind, &owner, &name, &descriptor)?))
    }

    fn method_ref(&mut self, index: u16) -> Result<Option<u16>> {
        let member = self.pool.member_ref(index)?;
        let owner = self.substitution.in_class_name(member.owner);
        let descriptor = self.substitution.in_descriptor(member.descriptor);
        if owner.is_none() && descriptor.is_none() {
            return Ok(None);
        }
        let kind = member.kind;
        let name = member.name.to_string();
        let owner = owner.unwrap_or_else(|| member.owner.to_string());
        let descriptor = descriptor.unwrap_or_else(|| member.descriptor.to_string());
        validate_descriptor(&descriptor)?;
        self.sites += 1;
        Ok(Some(self.pool.intern_member_ref(kind, &owner, &name, &descriptor)?))
    }

    fn class_ref(&mut self, index: u16) -> Result<Option<u16>> {
        let Some(name) = self.substitution.in_class_name(self.pool.class_name(index)?) else {
            return Ok(None);
        };
        self.sites += 1;
        Ok(Some(self.pool.intern_class(&name)?))
    }

    fn descriptor(&mut self, index: u16) -> Result<Option<u16>> {
        let Some(descriptor) = self.substitution.in_descriptor(self.pool.utf8(index)?) else {
            return Ok(None);
        };
        validate_descriptor(&descriptor)?;
        self.sites += 1;
        Ok(Some(self.pool.intern_utf8(&descriptor)?))
    }

    fn signature(&mut self, index: u16) -> Result<Option<u16>> {
        let Some(signature) = self.substitution.in_descriptor(self.pool.utf8(index)?) else {
            return Ok(None);
        };
        self.sites += 1;
        Ok(Some(self.pool.intern_utf8(&signature)?))
    }
}

/// Rejects a rewrite that no longer parses as a field or method descriptor.
fn validate_descriptor(descriptor: &str) -> Result<()> {
    if descriptor.starts_with('(') {
        FieldType::parse_method_descriptor(descriptor)?;
        return Ok(());
    }
    let (parameters, _) = FieldType::parse_method_descriptor(&format!("({descriptor})V"))?;
    if parameters.len() != 1 {
        return Err(ClassfileError::InvalidDescriptor(descriptor.to_string()).into());
    }
    Ok(())
}
