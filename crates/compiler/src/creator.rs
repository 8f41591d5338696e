//! Creator classes: one reflection-free factory per provider.

use crate::error::Result;
use shadowloader_classfile::descriptor::{internal_name, object_descriptor};
use shadowloader_classfile::opcode::{ALOAD_0, ARETURN, DUP, INVOKESPECIAL, INVOKEVIRTUAL, NEW, RETURN};
use shadowloader_classfile::{ClassBuilder, access};
use shadowloader_core::facade::{FacadeContract, creator_internal_name};

const OBJECT: &str = "java/lang/Object";
const FACTORY_METHOD: &str = "call";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCreator {
    /// Internal name of the creator class.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Emits the creator for a provider binary name:
///
/// ```java
/// public final class Impl_Creator implements Callable<Impl> {
///     public Impl call() { return new Impl(); }
/// }
/// ```
///
/// plus the erased `Object call()` bridge the factory interface is invoked
/// through.
pub fn generate_creator(contract: &FacadeContract, provider: &str) -> Result<GeneratedCreator> {
    let provider = internal_name(provider);
    let creator = creator_internal_name(&provider);
    let provider_descriptor = object_descriptor(&provider);
    let call_descriptor = format!("(){provider_descriptor}");
    let signature = format!(
        "{}L{}<{}>;",
        object_descriptor(OBJECT),
        contract.factory,
        provider_descriptor
    );

    let unit = ClassBuilder::new(&creator, OBJECT)?
        .access(access::ACC_PUBLIC | access::ACC_FINAL | access::ACC_SUPER)
        .implements(&contract.factory)?
        .signature(&signature)?
        .method_with(access::ACC_PUBLIC, "<init>", "()V", 1, 1, |code| {
            code.op(ALOAD_0)
                .invoke(INVOKESPECIAL, OBJECT, "<init>", "()V")?
                .op(RETURN);
            Ok(())
        })?
        .method_with(
            access::ACC_PUBLIC | access::ACC_FINAL,
            FACTORY_METHOD,
            &call_descriptor,
            2,
            1,
            |code| {
                code.type_insn(NEW, &provider)?
                    .op(DUP)
                    .invoke(INVOKESPECIAL, &provider, "<init>", "()V")?
                    .op(ARETURN);
                Ok(())
            },
        )?
        .method_with(
            access::ACC_PUBLIC | access::ACC_BRIDGE | access::ACC_SYNTHETIC,
            FACTORY_METHOD,
            "()Ljava/lang/Object;",
            1,
            1,
            |code| {
                code.op(ALOAD_0)
                    .invoke(INVOKEVIRTUAL, &creator, FACTORY_METHOD, &call_descriptor)?
                    .op(ARETURN);
                Ok(())
            },
        )?
        .build();

    Ok(GeneratedCreator {
        bytes: unit.to_bytes()?,
        name: creator,
    })
}
