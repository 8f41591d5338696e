//! `StackMapTable` decoding with absolute frame offsets.

use crate::attribute::STACK_MAP_TABLE;
use crate::error::{ClassfileError, Result};
use crate::reader::{ClassReader, WriteBe, checked_u2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Constant pool index of a `Class` entry.
    Object(u16),
    /// Code offset of the `new` instruction that created the value.
    Uninitialized(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Same,
    SameLocals1StackItem(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    /// Absolute bytecode offset the frame applies to.
    pub offset: usize,
    pub kind: FrameKind,
}

impl StackMapFrame {
    pub fn verification_types_mut(&mut self) -> Vec<&mut VerificationType> {
        match &mut self.kind {
            FrameKind::Same | FrameKind::Chop(_) => Vec::new(),
            FrameKind::SameLocals1StackItem(vt) => vec![vt],
            FrameKind::Append(locals) => locals.iter_mut().collect(),
            FrameKind::Full { locals, stack } => locals.iter_mut().chain(stack.iter_mut()).collect(),
        }
    }
}

fn malformed(reason: impl Into<String>) -> ClassfileError {
    ClassfileError::MalformedAttribute {
        name: STACK_MAP_TABLE,
        reason: reason.into(),
    }
}

pub fn parse(info: &[u8]) -> Result<Vec<StackMapFrame>> {
    let mut reader = ClassReader::new(info);
    let count = reader.read_u2()?;
    let mut frames = Vec::with_capacity(count as usize);
    let mut previous: Option<usize> = None;

    for _ in 0..count {
        let frame_type = reader.read_u1()?;
        let (delta, kind) = match frame_type {
            0..=63 => (frame_type as usize, FrameKind::Same),
            64..=127 => (
                (frame_type - 64) as usize,
                FrameKind::SameLocals1StackItem(read_type(&mut reader)?),
            ),
            247 => {
                let delta = reader.read_u2()? as usize;
                (delta, FrameKind::SameLocals1StackItem(read_type(&mut reader)?))
            }
            248..=250 => (reader.read_u2()? as usize, FrameKind::Chop(251 - frame_type)),
            251 => (reader.read_u2()? as usize, FrameKind::Same),
            252..=254 => {
                let delta = reader.read_u2()? as usize;
                let locals = (0..frame_type - 251)
                    .map(|_| read_type(&mut reader))
                    .collect::<Result<Vec<_>>>()?;
                (delta, FrameKind::Append(locals))
            }
            255 => {
                let delta = reader.read_u2()? as usize;
                let locals = read_types(&mut reader)?;
                let stack = read_types(&mut reader)?;
                (delta, FrameKind::Full { locals, stack })
            }
            other => return Err(malformed(format!("reserved frame type {other}"))),
        };
        let offset = match previous {
            None => delta,
            Some(prev) => prev + delta + 1,
        };
        previous = Some(offset);
        frames.push(StackMapFrame { offset, kind });
    }

    if reader.remaining() != 0 {
        return Err(malformed("trailing bytes"));
    }
    Ok(frames)
}

/// Encodes frames, picking the compact frame form whenever the delta allows it.
pub fn encode(frames: &[StackMapFrame]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.put_u2(checked_u2(frames.len(), "stack map frame count")?);
    let mut previous: Option<usize> = None;

    for frame in frames {
        let delta = match previous {
            None => frame.offset,
            Some(prev) if frame.offset > prev => frame.offset - prev - 1,
            Some(_) => return Err(malformed("frames out of order")),
        };
        previous = Some(frame.offset);
        let delta = checked_u2(delta, "stack map offset delta")?;

        match &frame.kind {
            FrameKind::Same if delta <= 63 => out.put_u1(delta as u8),
            FrameKind::Same => {
                out.put_u1(251);
                out.put_u2(delta);
            }
            FrameKind::SameLocals1StackItem(vt) => {
                if delta <= 63 {
                    out.put_u1(64 + delta as u8);
                } else {
                    out.put_u1(247);
                    out.put_u2(delta);
                }
                write_type(&mut out, *vt);
            }
            FrameKind::Chop(k) => {
                out.put_u1(251 - k);
                out.put_u2(delta);
            }
            FrameKind::Append(locals) => {
                out.put_u1(251 + locals.len() as u8);
                out.put_u2(delta);
                for vt in locals {
                    write_type(&mut out, *vt);
                }
            }
            FrameKind::Full { locals, stack } => {
                out.put_u1(255);
                out.put_u2(delta);
                out.put_u2(checked_u2(locals.len(), "frame locals")?);
                for vt in locals {
                    write_type(&mut out, *vt);
                }
                out.put_u2(checked_u2(stack.len(), "frame stack")?);
                for vt in stack {
                    write_type(&mut out, *vt);
                }
            }
        }
    }
    Ok(out)
}

fn read_types(reader: &mut ClassReader<'_>) -> Result<Vec<VerificationType>> {
    let count = reader.read_u2()?;
    (0..count).map(|_| read_type(reader)).collect()
}

fn read_type(reader: &mut ClassReader<'_>) -> Result<VerificationType> {
    let vt = match reader.read_u1()? {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(reader.read_u2()?),
        8 => VerificationType::Uninitialized(reader.read_u2()?),
        other => return Err(malformed(format!("unknown verification type tag {other}"))),
    };
    Ok(vt)
}

fn write_type(out: &mut Vec<u8>, vt: VerificationType) {
    match vt {
        VerificationType::Top => out.put_u1(0),
        VerificationType::Integer => out.put_u1(1),
        VerificationType::Float => out.put_u1(2),
        VerificationType::Double => out.put_u1(3),
        VerificationType::Long => out.put_u1(4),
        VerificationType::Null => out.put_u1(5),
        VerificationType::UninitializedThis => out.put_u1(6),
        VerificationType::Object(index) => {
            out.put_u1(7);
            out.put_u2(index);
        }
        VerificationType::Uninitialized(offset) => {
            out.put_u1(8);
            out.put_u2(offset);
        }
    }
}
