//! Registry patcher.
//!
//! Injects one registration per `(interface, provider)` pair into the
//! registry's static initializer, directly before every `return`.

use crate::error::{Result, TransformError};
use crate::facade::{FacadeContract, REGISTER_METHOD};
use crate::model::DeclarationTable;
use shadowloader_classfile::opcode::{DUP, INVOKESPECIAL, INVOKESTATIC, NEW, RETURN};
use shadowloader_classfile::{
    ClassUnit, CodeAttribute, CodeBuilder, ConstantPool, Member, RawAttribute, access, attribute,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

const CLASS_INITIALIZER: &str = "<clinit>";
const CLASS_INITIALIZER_DESCRIPTOR: &str = "()V";

/// Operand stack slots a registration needs on top of the initializer's own.
const REGISTRATION_STACK: u16 = 3;

/// First class file version whose `ldc` accepts class constants.
const MIN_CLASS_LITERAL_VERSION: u16 = 49;

#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub bytes: Vec<u8>,
    /// Number of `return` instructions that received the registrations.
    pub return_points: usize,
    /// Registrations inserted before each return point.
    pub registrations: usize,
    pub synthesized_initializer: bool,
}

/// Patches the registry class.
///
/// Patching is single-shot: running it twice over the same unit registers
/// every pair twice.
#[derive(Debug, Clone, Default)]
pub struct RegistryPatcher {
    contract: FacadeContract,
}

impl RegistryPatcher {
    pub fn new(contract: FacadeContract) -> Self {
        Self { contract }
    }

    pub fn patch(&self, bytes: &[u8], table: &DeclarationTable) -> Result<PatchOutcome> {
        let mut unit = ClassUnit::parse(bytes)?;
        let class = unit.name()?.to_string();

        let (method_index, synthesized_initializer) =
            match unit.find_method(CLASS_INITIALIZER, CLASS_INITIALIZER_DESCRIPTOR) {
                Some(index) => (index, false),
                None => {
                    debug!("{} has no static initializer, synthesizing one", class);
                    (synthesize_initializer(&mut unit)?, true)
                }
            };

        let code_slot = unit.methods[method_index]
            .attribute(&unit.constant_pool, attribute::CODE)
            .map(|(slot, _)| slot)
            .ok_or_else(|| TransformError::patch(&class, "static initializer has no Code attribute"))?;

        let structural = |e: shadowloader_classfile::ClassfileError| TransformError::patch(&class, e.to_string());

        let code = CodeAttribute::parse(&unit.methods[method_index].attributes[code_slot].info)
            .map_err(structural)?;
        let return_points: Vec<usize> = code
            .instructions()
            .map_err(structural)?
            .iter()
            .filter(|insn| insn.opcode == RETURN)
            .map(|insn| insn.offset)
            .collect();
        if return_points.is_empty() {
            return Err(TransformError::patch(
                &class,
                "static initializer has no return instruction",
            ));
        }

        let registrations = table.pair_count();
        if registrations > 0 && unit.major_version < MIN_CLASS_LITERAL_VERSION {
            return Err(TransformError::patch(
                &class,
                format!(
                    "class file version {} cannot load class literals",
                    unit.major_version
                ),
            ));
        }

        let snippet = self
            .registration_sequence(&mut unit.constant_pool, table)
            .map_err(structural)?;

        if !snippet.is_empty() {
            let insertions: BTreeMap<usize, Vec<u8>> = return_points
                .iter()
                .map(|offset| (*offset, snippet.clone()))
                .collect();
            let mut patched = code
                .insert_before(&insertions, &unit.constant_pool)
                .map_err(structural)?;
            patched.max_stack = code
                .max_stack
                .checked_add(REGISTRATION_STACK)
                .ok_or_else(|| TransformError::patch(&class, "max_stack exceeds class file limits"))?;
            unit.methods[method_index].attributes[code_slot].info =
                patched.to_bytes().map_err(structural)?;
        }

        info!(
            "Patched {}: {} registrations before each of {} return points",
            class,
            registrations,
            return_points.len()
        );

        Ok(PatchOutcome {
            bytes: unit.to_bytes()?,
            return_points: return_points.len(),
            registrations,
            synthesized_initializer,
        })
    }

    /// `ldc_w I.class; new C; dup; invokespecial C.<init>; invokestatic register`
    /// for each pair, in table order.
    fn registration_sequence(
        &self,
        pool: &mut ConstantPool,
        table: &DeclarationTable,
    ) -> shadowloader_classfile::Result<Vec<u8>> {
        let register = self.contract.register_descriptor();
        let mut code = CodeBuilder::new(pool);
        for record in table.records() {
            let creator = record.creator_internal_name();
            code.ldc_class(&record.interface_internal_name())?
                .type_insn(NEW, &creator)?
                .op(DUP)
                .invoke(INVOKESPECIAL, &creator, "<init>", "()V")?
                .invoke(INVOKESTATIC, &self.contract.registry, REGISTER_METHOD, &register)?;
        }
        Ok(code.finish())
    }
}

/// Appends `static void <clinit>() { return; }` and returns its index.
fn synthesize_initializer(unit: &mut ClassUnit) -> Result<usize> {
    let pool = &mut unit.constant_pool;
    let code = CodeAttribute::new(0, 0, vec![RETURN]);
    let method = Member {
        access_flags: access::ACC_STATIC,
        name_index: pool.intern_utf8(CLASS_INITIALIZER)?,
        descriptor_index: pool.intern_utf8(CLASS_INITIALIZER_DESCRIPTOR)?,
        attributes: vec![RawAttribute {
            name_index: pool.intern_utf8(attribute::CODE)?,
            info: code.to_bytes()?,
        }],
    };
    unit.methods.push(method);
    Ok(unit.methods.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::SERVICE_REGISTRY;
    use shadowloader_classfile::ClassBuilder;
    use shadowloader_classfile::opcode::{ACONST_NULL, ATHROW, ICONST_0, IFEQ, LDC_W};

    fn registry_with_initializer(body: Vec<u8>, max_stack: u16) -> Vec<u8> {
        ClassBuilder::new(SERVICE_REGISTRY, "java/lang/Object")
            .unwrap()
            .method(
                access::ACC_STATIC,
                CLASS_INITIALIZER,
                CLASS_INITIALIZER_DESCRIPTOR,
                None,
                Some(CodeAttribute::new(max_stack, 0, body)),
            )
            .unwrap()
            .build()
            .to_bytes()
            .unwrap()
    }

    fn initializer(bytes: &[u8]) -> (ClassUnit, Member, CodeAttribute) {
        let unit = ClassUnit::parse(bytes).unwrap();
        let index = unit
            .find_method(CLASS_INITIALIZER, CLASS_INITIALIZER_DESCRIPTOR)
            .unwrap();
        let method = unit.methods[index].clone();
        let (_, raw) = method.attribute(&unit.constant_pool, attribute::CODE).unwrap();
        let code = CodeAttribute::parse(&raw.info).unwrap();
        (unit, method, code)
    }

    fn table(pairs: &[(&str, &str)]) -> DeclarationTable {
        let mut table = DeclarationTable::new();
        for (interface, provider) in pairs {
            table.push(*interface, *provider);
        }
        table
    }

    fn register_calls(unit: &ClassUnit, code: &CodeAttribute) -> usize {
        code.instructions()
            .unwrap()
            .iter()
            .filter(|insn| insn.opcode == INVOKESTATIC)
            .filter(|insn| {
                let member = unit
                    .constant_pool
                    .member_ref(insn.u2_operand(&code.code))
                    .unwrap();
                member.owner == SERVICE_REGISTRY && member.name == REGISTER_METHOD
            })
            .count()
    }

    #[test]
    fn test_registrations_precede_every_return_and_branches_follow() {
        // iconst_0; ifeq -> second return; return; return
        let bytes = registry_with_initializer(vec![ICONST_0, IFEQ, 0x00, 0x04, RETURN, RETURN], 1);
        let pairs = table(&[("com.x.Api", "com.x.impl.Foo"), ("com.x.Api", "com.x.impl.Foo")]);

        let outcome = RegistryPatcher::default().patch(&bytes, &pairs).unwrap();
        assert_eq!(outcome.return_points, 2);
        assert_eq!(outcome.registrations, 2);
        assert!(!outcome.synthesized_initializer);

        let (unit, _, code) = initializer(&outcome.bytes);
        assert_eq!(code.max_stack, 1 + REGISTRATION_STACK);
        assert_eq!(register_calls(&unit, &code), 4);

        // 13 bytes per registration, two per return point
        let snippet = 26;
        assert_eq!(code.code.len(), 6 + 2 * snippet);
        assert_eq!(code.code[4], LDC_W);
        assert_eq!(code.code[4 + snippet], RETURN);
        assert_eq!(code.code[5 + 2 * snippet], RETURN);
        let ifeq_target = 1 + i16::from_be_bytes([code.code[2], code.code[3]]) as usize;
        assert_eq!(ifeq_target, 5 + snippet);
        assert_eq!(code.code[ifeq_target], LDC_W);
    }

    #[test]
    fn test_registration_operands_name_creator_and_interface() {
        let bytes = registry_with_initializer(vec![RETURN], 0);
        let pairs = table(&[("com.x.Api", "com.x.impl.Outer$Inner")]);

        let outcome = RegistryPatcher::default().patch(&bytes, &pairs).unwrap();
        let (unit, _, code) = initializer(&outcome.bytes);
        let insns = code.instructions().unwrap();
        let opcodes: Vec<u8> = insns.iter().map(|insn| insn.opcode).collect();
        assert_eq!(opcodes, [LDC_W, NEW, DUP, INVOKESPECIAL, INVOKESTATIC, RETURN]);

        let pool = &unit.constant_pool;
        assert_eq!(pool.class_name(insns[0].u2_operand(&code.code)).unwrap(), "com/x/Api");
        assert_eq!(
            pool.class_name(insns[1].u2_operand(&code.code)).unwrap(),
            "com/x/impl/Outer$Inner_Creator"
        );
        let init = pool.member_ref(insns[3].u2_operand(&code.code)).unwrap();
        assert_eq!((init.owner, init.name, init.descriptor), ("com/x/impl/Outer$Inner_Creator", "<init>", "()V"));
        let register = pool.member_ref(insns[4].u2_operand(&code.code)).unwrap();
        assert_eq!(register.descriptor, "(Ljava/lang/Class;Ljava/util/concurrent/Callable;)V");
    }

    #[test]
    fn test_missing_initializer_is_synthesized() {
        let bytes = ClassBuilder::new(SERVICE_REGISTRY, "java/lang/Object")
            .unwrap()
            .build()
            .to_bytes()
            .unwrap();
        let pairs = table(&[("a.B", "a.impl.C")]);

        let outcome = RegistryPatcher::default().patch(&bytes, &pairs).unwrap();
        assert!(outcome.synthesized_initializer);

        let (unit, method, code) = initializer(&outcome.bytes);
        assert_eq!(method.access_flags, access::ACC_STATIC);
        assert_eq!(code.max_stack, REGISTRATION_STACK);
        assert_eq!(code.code.len(), 13 + 1);
        assert_eq!(code.code.last(), Some(&RETURN));
        assert_eq!(register_calls(&unit, &code), 1);
    }

    #[test]
    fn test_empty_table_still_synthesizes_a_bare_initializer() {
        let bytes = ClassBuilder::new(SERVICE_REGISTRY, "java/lang/Object")
            .unwrap()
            .build()
            .to_bytes()
            .unwrap();

        let outcome = RegistryPatcher::default()
            .patch(&bytes, &DeclarationTable::new())
            .unwrap();
        let (_, _, code) = initializer(&outcome.bytes);
        assert_eq!(code.code, [RETURN]);
        assert_eq!(outcome.registrations, 0);
    }

    #[test]
    fn test_initializer_without_return_is_structural_error() {
        let bytes = registry_with_initializer(vec![ACONST_NULL, ATHROW], 1);
        let err = RegistryPatcher::default()
            .patch(&bytes, &table(&[("a.B", "a.impl.C")]))
            .unwrap_err();
        assert!(matches!(err, TransformError::PatchStructural { .. }));
        assert!(err.to_string().contains(SERVICE_REGISTRY));
    }

    #[test]
    fn test_initializer_without_code_is_structural_error() {
        let bytes = ClassBuilder::new(SERVICE_REGISTRY, "java/lang/Object")
            .unwrap()
            .method(
                access::ACC_STATIC,
                CLASS_INITIALIZER,
                CLASS_INITIALIZER_DESCRIPTOR,
                None,
                None,
            )
            .unwrap()
            .build()
            .to_bytes()
            .unwrap();
        let err = RegistryPatcher::default()
            .patch(&bytes, &table(&[("a.B", "a.impl.C")]))
            .unwrap_err();
        assert!(matches!(err, TransformError::PatchStructural { .. }));
    }
}
