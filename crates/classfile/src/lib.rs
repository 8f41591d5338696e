//! Editing and writing JVM class files.
//!
//! This is the edit path of the transform: inserting instructions into a
//! method body and relocating everything that addresses code by byte offset
//! (branches, switches, exception ranges, `StackMapTable` frames, line and
//! local-variable tables), and redirecting constant-pool references by
//! appending entries. Inspection-only reads go through `ristretto_classfile`.
//!
//! The constant pool and member tables are fully modelled; attributes stay
//! raw until a caller decodes a `Code` or `StackMapTable` payload, and
//! everything that is not edited is written back byte-for-byte.

pub mod attribute;
pub mod builder;
pub mod class;
pub mod code;
pub mod constant;
pub mod descriptor;
pub mod error;
pub mod opcode;
mod reader;
pub mod stackmap;

pub use attribute::{Annotation, ElementValue, RawAttribute};
pub use builder::{ClassBuilder, CodeBuilder};
pub use class::{ClassUnit, Member, access};
pub use code::{CodeAttribute, ExceptionHandler, Instruction};
pub use constant::{Constant, ConstantPool, JavaString, MemberKind, MemberRef};
pub use descriptor::TypeSubstitution;
pub use error::{ClassfileError, Result};
